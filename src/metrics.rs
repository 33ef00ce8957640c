use prometheus::{self, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge};

/// Collector registry for the crate. The host application decides how the
/// registry is served or pushed; this library only registers and updates.
pub struct Metrics {
    reg: prometheus::Registry,
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics {
            reg: prometheus::Registry::new(),
        }
    }

    /// Constructor for use in unittests
    pub fn dummy() -> Metrics {
        Metrics::new()
    }

    pub fn counter_int(&self, opts: prometheus::Opts) -> IntCounter {
        let c = IntCounter::with_opts(opts).unwrap();
        self.reg.register(Box::new(c.clone())).unwrap();
        c
    }

    pub fn counter_int_vec(&self, opts: prometheus::Opts, labels: &[&str]) -> IntCounterVec {
        let c = IntCounterVec::new(opts, labels).unwrap();
        self.reg.register(Box::new(c.clone())).unwrap();
        c
    }

    pub fn gauge_int(&self, opts: prometheus::Opts) -> IntGauge {
        let g = IntGauge::with_opts(opts).unwrap();
        self.reg.register(Box::new(g.clone())).unwrap();
        g
    }

    pub fn histogram(&self, opts: prometheus::HistogramOpts) -> Histogram {
        let h = Histogram::with_opts(opts).unwrap();
        self.reg.register(Box::new(h.clone())).unwrap();
        h
    }

    pub fn histogram_vec(&self, opts: prometheus::HistogramOpts, labels: &[&str]) -> HistogramVec {
        let h = HistogramVec::new(opts, labels).unwrap();
        self.reg.register(Box::new(h.clone())).unwrap();
        h
    }

    pub fn registry(&self) -> &prometheus::Registry {
        &self.reg
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}
