//! Prometheus metrics for compilations

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    compilations: IntCounterVec,
    compile_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let compilations = IntCounterVec::new(
            Opts::new("sift_compilations_total", "Compilations by outcome"),
            &["outcome"],
        )?;
        let compile_seconds = Histogram::with_opts(
            HistogramOpts::new("sift_compile_seconds", "Time spent compiling one request")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(compilations.clone()))?;
        registry.register(Box::new(compile_seconds.clone()))?;
        Ok(Self {
            registry,
            compilations,
            compile_seconds,
        })
    }

    /// Count one compilation; `outcome` is `ok` or an error kind.
    pub fn observe(&self, outcome: &str, seconds: f64) {
        self.compilations.with_label_values(&[outcome]).inc();
        self.compile_seconds.observe(seconds);
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_counts_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.observe("ok", 0.002);
        metrics.observe("ok", 0.003);
        metrics.observe("invalid_search_query", 0.001);

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"sift_compilations_total{outcome="ok"} 2"#), "{}", text);
        assert!(text.contains(r#"sift_compilations_total{outcome="invalid_search_query"} 1"#));
        assert!(text.contains("sift_compile_seconds_count 3"));
    }
}
