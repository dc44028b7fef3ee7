#![no_main]

use libfuzzer_sys::fuzz_target;
use proxylog_log_pipeline::parser::{RecordGrammar, RequestGrammar, dispatch::dispatch};
use proxylog_log_pipeline::Stage;

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = std::str::from_utf8(data) else {
        return;
    };
    let (Ok(records), Ok(requests)) = (RecordGrammar::new(), RequestGrammar::new()) else {
        return;
    };

    if let Stage::Matched(record) = records.extract(payload) {
        let _ = dispatch(&requests, &record);
    }
});
