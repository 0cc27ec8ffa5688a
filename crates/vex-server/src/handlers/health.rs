/// Only tells that the exporter accepts connections; `varnish_up` carries the
/// scrape health.
pub async fn health() -> &'static str {
    "Ok\n"
}
