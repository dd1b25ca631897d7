#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use xids_dfa::{Dfa, SignatureSet};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 시그니처 목록 (최대 16개, 각 64바이트로 제한)
    signatures: Vec<Vec<u8>>,
    /// 스캔 대상 페이로드
    payload: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let signatures: Vec<Vec<u8>> = input
        .signatures
        .into_iter()
        .take(16)
        .map(|mut s| {
            s.truncate(64);
            s
        })
        .filter(|s| !s.is_empty())
        .collect();
    if signatures.is_empty() {
        return;
    }

    let set: SignatureSet = signatures.iter().collect();
    let Ok(dfa) = Dfa::compile(&set) else {
        return;
    };

    // DFA 판정은 단순 부분 문자열 검색과 일치해야 한다
    let naive = signatures
        .iter()
        .any(|s| input.payload.windows(s.len()).any(|w| w == s.as_slice()));
    assert_eq!(dfa.is_match(&input.payload), naive);

    for end in dfa.scan(&input.payload) {
        let window = &input.payload[..end];
        assert!(signatures.iter().any(|s| window.ends_with(s)));
    }
});
