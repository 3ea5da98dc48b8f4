//! Per-invocation telemetry hook.
//!
//! One trace event per store command, tagged with the invocation's
//! attributes. Subscribers in the binary layer turn these into metrics.

#[cfg(feature = "tracing")]
pub fn emit_span(event: &str, attributes: &[(&str, String)]) {
    let span = tracing::trace_span!("docql.invocation", event);
    let _entered = span.enter();
    let fields = attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::trace!(target: "docql::metrics", %event, %fields, "store command");
}

#[cfg(not(feature = "tracing"))]
pub fn emit_span(_event: &str, _attributes: &[(&str, String)]) {}
