#![no_main]

use chrono::{Local, TimeZone};
use libfuzzer_sys::fuzz_target;
use proxylog_log_pipeline::LineClassifier;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(classifier) = LineClassifier::new("dumbproxy") else {
        return;
    };
    let Some(now) = Local.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).single() else {
        return;
    };

    // 크래시나 패닉 없이 Ok 또는 Err을 반환해야 한다
    let _ = classifier.classify_at(line, now);
});
