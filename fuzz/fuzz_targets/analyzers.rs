#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use querywatch_core::config::ExfiltrationConfig;
use querywatch_core::pipeline::Analyzer;
use querywatch_core::types::{Query, QueryMetadata};
use querywatch_pipeline::{ExfiltrationAnalyzer, SqlInjectionAnalyzer};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    sql: String,
    object_name: Option<String>,
    user_id: Option<String>,
}

fuzz_target!(|input: FuzzInput| {
    let Ok(query) = Query::new(
        input.sql,
        QueryMetadata {
            object_name: input.object_name,
            user_id: input.user_id,
            ..Default::default()
        },
    ) else {
        return;
    };

    let sqli = SqlInjectionAnalyzer::with_defaults().expect("default signatures compile");
    let exfil = ExfiltrationAnalyzer::new(&ExfiltrationConfig::default())
        .expect("default config is valid");

    // 분석기는 어떤 입력에도 패닉 없이 Ok/Err를 반환해야 함
    let _ = sqli.analyze(&query);
    let _ = exfil.analyze(&query);
});
