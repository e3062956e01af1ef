use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("visearch_search_count", "count of the image to search").unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("visearch_search_duration", "duration of the per-image search in seconds")
        .unwrap()
});

static METRIC_SEARCH_MIN_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "visearch_search_min_score",
        "distance of the best match of the per-image search",
        vec![0.05, 0.1, 0.2, 0.3, 0.5, 0.75, 1.0, 1.5, 2.0, 4.0]
    )
    .unwrap()
});

static METRIC_EXPLAIN_FALLBACK: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "visearch_explain_fallback_count",
        "count of the explanation that fell back to the original image"
    )
    .unwrap()
});

/// 记录一次搜索，`best` 为最佳结果的距离
pub fn observe_search(duration: f64, best: Option<f64>) {
    METRIC_SEARCH_COUNT.inc();
    METRIC_SEARCH_DURATION.observe(duration);
    if let Some(best) = best {
        METRIC_SEARCH_MIN_SCORE.observe(best);
    }
}

pub fn inc_explain_fallback() {
    METRIC_EXPLAIN_FALLBACK.inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    TextEncoder::new().encode_to_string(&prometheus::gather()).unwrap_or_default()
}
