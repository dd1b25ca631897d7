//! 다중 패턴 DFA 컴파일러
//!
//! [`Dfa::compile()`]은 시그니처 목록으로 트라이를 만들고, BFS로 실패 링크를 계산한 뒤
//! 모든 `(상태, 바이트)` 쌍의 전이를 채워 **완전한(total)** 결정적 오토마톤을 만듭니다.
//! 소비자(커널 매칭 프로그램)는 별도의 실패 처리 없이 바이트당 한 번의 조회로 진행합니다.
//!
//! # 수락 의미
//! 시작 상태에서 페이로드를 소비하다가 수락 상태에 도달했다면, 현재 위치에서 끝나는
//! 시그니처가 하나 이상 존재합니다. 어떤 시그니처인지는 보존하지 않습니다.
//!
//! # 복잡도
//! 상태 수는 전체 시그니처 길이 합 + 1 이하이며, 시간/공간은 `상태 수 × 256`에 비례합니다.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info};

use xids_core::error::CompileError;
use xids_core::metrics as m;

use crate::loader::SignatureSet;

/// 상태 ID (0 = 시작 상태)
pub type StateId = u32;

/// 알파벳 크기 (바이트)
const ALPHABET: usize = 256;

/// 트라이 구성 중 "전이 없음" 표시
const NONE: StateId = StateId::MAX;

/// 완전한 결정적 다중 패턴 오토마톤
///
/// 생성 이후 불변입니다. 시그니처가 바뀌면 새로 컴파일하여 교체합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dfa {
    /// 상태 우선 전이 테이블 (`state * 256 + byte`)
    delta: Vec<StateId>,
    /// 상태별 수락 플래그
    accept: Vec<bool>,
}

/// 단일 전이 (직렬화 단위)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// 출발 상태
    pub from: StateId,
    /// 입력 바이트
    pub byte: u8,
    /// 도착 상태
    pub to: StateId,
    /// 도착 상태의 수락 여부
    pub accepting: bool,
}

impl Dfa {
    /// 시작 상태 ID
    pub const START: StateId = 0;

    /// 시그니처 목록을 오토마톤으로 컴파일합니다.
    ///
    /// 빈 목록은 256개의 자기 전이만 가진 단일 시작 상태가 됩니다.
    ///
    /// # 에러
    /// - `CompileError::StateOverflow`: 상태 수가 `u32` 범위를 넘는 경우
    /// - `CompileError::IncompleteTransition`: 결정화 자체 검증 실패 (내부 불변식 위반)
    pub fn compile(signatures: &SignatureSet) -> Result<Self, CompileError> {
        let started = Instant::now();

        let mut trie = Trie::new();
        for (index, signature) in signatures.iter().enumerate() {
            trie.insert(index, signature)?;
        }
        let trie_states = trie.accept.len();

        let dfa = trie.determinize();
        dfa.verify_total()?;

        let elapsed = started.elapsed();
        metrics::gauge!(m::DFA_SIGNATURES).set(signatures.len() as f64);
        metrics::gauge!(m::DFA_STATES).set(dfa.state_count() as f64);
        metrics::histogram!(m::DFA_COMPILE_DURATION_SECONDS).record(elapsed.as_secs_f64());

        info!(
            signatures = signatures.len(),
            states = trie_states,
            accepting = dfa.accept.iter().filter(|&&a| a).count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "signatures compiled into dfa"
        );
        Ok(dfa)
    }

    /// 시작 상태
    pub const fn start(&self) -> StateId {
        Self::START
    }

    /// 상태 수
    pub fn state_count(&self) -> usize {
        self.accept.len()
    }

    /// `state`에서 `byte`를 소비한 다음 상태
    ///
    /// # Panics
    /// `state`가 범위를 벗어나면 패닉합니다.
    #[inline]
    pub fn next(&self, state: StateId, byte: u8) -> StateId {
        self.delta[state as usize * ALPHABET + byte as usize]
    }

    /// 수락 상태 여부
    #[inline]
    pub fn is_accepting(&self, state: StateId) -> bool {
        self.accept[state as usize]
    }

    /// 전체 전이를 상태 우선, 바이트 오름차순으로 순회합니다.
    pub fn transitions(&self) -> impl ExactSizeIterator<Item = Transition> + '_ {
        self.delta.iter().enumerate().map(|(i, &to)| Transition {
            from: (i / ALPHABET) as StateId,
            byte: (i % ALPHABET) as u8,
            to,
            accepting: self.accept[to as usize],
        })
    }

    /// 페이로드를 스캔하여 수락 상태에 도달한 위치를 순회합니다.
    ///
    /// 반환 값은 매칭이 끝난 위치의 **배타적** 끝 오프셋입니다
    /// (`payload[..end]`의 접미사가 시그니처).
    pub fn scan<'a>(&'a self, payload: &'a [u8]) -> Matches<'a> {
        Matches {
            dfa: self,
            payload,
            pos: 0,
            state: Self::START,
        }
    }

    /// 페이로드에 시그니처가 하나라도 포함되어 있는지 확인합니다.
    pub fn is_match(&self, payload: &[u8]) -> bool {
        self.scan(payload).next().is_some()
    }

    /// 모든 `(상태, 바이트)` 쌍이 유효한 상태로 전이되는지 검증합니다.
    fn verify_total(&self) -> Result<(), CompileError> {
        let states = self.accept.len();
        match self
            .delta
            .iter()
            .position(|&to| to == NONE || to as usize >= states)
        {
            None => Ok(()),
            Some(i) => Err(CompileError::IncompleteTransition {
                state: (i / ALPHABET) as StateId,
                byte: (i % ALPHABET) as u8,
            }),
        }
    }
}

/// [`Dfa::scan()`]이 반환하는 매칭 위치 반복자
pub struct Matches<'a> {
    dfa: &'a Dfa,
    payload: &'a [u8],
    pos: usize,
    state: StateId,
}

impl Matches<'_> {
    /// 지금까지 소비한 위치에서의 오토마톤 상태
    pub fn state(&self) -> StateId {
        self.state
    }
}

impl Iterator for Matches<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.pos < self.payload.len() {
            self.state = self.dfa.next(self.state, self.payload[self.pos]);
            self.pos += 1;
            if self.dfa.is_accepting(self.state) {
                return Some(self.pos);
            }
        }
        None
    }
}

/// 구성 중인 트라이 (전이가 비어 있을 수 있음)
struct Trie {
    goto: Vec<StateId>,
    accept: Vec<bool>,
}

impl Trie {
    fn new() -> Self {
        Self {
            goto: vec![NONE; ALPHABET],
            accept: vec![false],
        }
    }

    /// 시그니처 경로를 추가하고 끝 노드에 수락 플래그를 설정합니다.
    fn insert(&mut self, index: usize, signature: &[u8]) -> Result<(), CompileError> {
        let mut state = Dfa::START;
        for &byte in signature {
            let slot = state as usize * ALPHABET + byte as usize;
            if self.goto[slot] == NONE {
                let id = StateId::try_from(self.accept.len())
                    .ok()
                    .filter(|&id| id != NONE)
                    .ok_or(CompileError::StateOverflow {
                        signature_index: index,
                    })?;
                self.goto.resize(self.goto.len() + ALPHABET, NONE);
                self.accept.push(false);
                self.goto[slot] = id;
            }
            state = self.goto[slot];
        }
        if self.accept[state as usize] {
            debug!(signature_index = index, "signature shares an accept state");
        }
        self.accept[state as usize] = true;
        Ok(())
    }

    /// BFS로 실패 링크를 계산하고 빈 전이를 실패 체인으로 채웁니다.
    ///
    /// BFS 순서상 실패 링크 대상은 항상 더 얕은 상태이므로,
    /// 처리 시점에 이미 전이가 완성되어 있고 수락 플래그도 확정되어 있습니다.
    fn determinize(self) -> Dfa {
        let Self {
            mut goto,
            mut accept,
        } = self;
        let mut fail = vec![Dfa::START; accept.len()];
        let mut queue = VecDeque::new();

        for slot in goto.iter_mut().take(ALPHABET) {
            if *slot == NONE {
                *slot = Dfa::START;
            } else {
                queue.push_back(*slot);
            }
        }

        while let Some(state) = queue.pop_front() {
            let s = state as usize;
            let f = fail[s] as usize;
            accept[s] |= accept[f];

            for byte in 0..ALPHABET {
                let via_fail = goto[f * ALPHABET + byte];
                let slot = s * ALPHABET + byte;
                let child = goto[slot];
                if child == NONE {
                    goto[slot] = via_fail;
                } else {
                    fail[child as usize] = via_fail;
                    queue.push_back(child);
                }
            }
        }

        Dfa {
            delta: goto,
            accept,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(signatures: &[&str]) -> Dfa {
        let set: SignatureSet = signatures.iter().collect();
        Dfa::compile(&set).unwrap()
    }

    /// 단순 부분 문자열 검색 기반 기준 구현
    fn naive_match_ends(signatures: &[&[u8]], payload: &[u8]) -> Vec<usize> {
        (1..=payload.len())
            .filter(|&end| {
                signatures
                    .iter()
                    .any(|sig| !sig.is_empty() && payload[..end].ends_with(sig))
            })
            .collect()
    }

    #[test]
    fn example_signatures_match_expected_positions() {
        let dfa = compile(&["cat", "attack", "tac"]);
        let ends: Vec<usize> = dfa.scan(b"the attack cat").collect();
        // "tac" (attack 내부) → 9, "attack" → 10, "cat" → 14
        assert_eq!(ends, vec![9, 10, 14]);
    }

    #[test]
    fn example_non_matching_payload_never_accepts() {
        let dfa = compile(&["cat", "attack", "tac"]);
        assert_eq!(dfa.scan(b"no match here").count(), 0);
        assert!(!dfa.is_match(b"no match here"));
    }

    #[test]
    fn empty_signature_set_is_single_self_looping_state() {
        let dfa = compile(&[]);
        assert_eq!(dfa.state_count(), 1);
        for byte in 0..=255u8 {
            assert_eq!(dfa.next(Dfa::START, byte), Dfa::START);
        }
        assert!(!dfa.is_accepting(Dfa::START));
    }

    #[test]
    fn prefix_signature_keeps_both_accept_states() {
        let dfa = compile(&["he", "hers"]);
        let ends: Vec<usize> = dfa.scan(b"hers").collect();
        assert_eq!(ends, vec![2, 4]);
    }

    #[test]
    fn suffix_overlap_is_ored_into_accept_flag() {
        // "she"의 끝 상태는 실패 링크로 "he"의 수락을 물려받음
        let dfa = compile(&["she", "he"]);
        let mut state = Dfa::START;
        for &b in b"she" {
            state = dfa.next(state, b);
        }
        assert!(dfa.is_accepting(state));
        assert_eq!(dfa.scan(b"ushers").collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn duplicate_signatures_are_idempotent() {
        let once = compile(&["abc", "bcd"]);
        let twice = compile(&["abc", "bcd", "abc"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn state_count_is_bounded_by_total_length() {
        let signatures = ["abcdef", "abcxyz", "zzz"];
        let dfa = compile(&signatures);
        let total: usize = signatures.iter().map(|s| s.len()).sum();
        assert!(dfa.state_count() <= total + 1);
        // 공통 접두사 "abc" 공유
        assert_eq!(dfa.state_count(), 1 + 6 + 3 + 3);
    }

    #[test]
    fn transitions_are_total_and_ordered() {
        let dfa = compile(&["ab", "b"]);
        let transitions: Vec<Transition> = dfa.transitions().collect();
        assert_eq!(transitions.len(), dfa.state_count() * 256);
        for pair in transitions.windows(2) {
            let a = (pair[0].from, pair[0].byte);
            let b = (pair[1].from, pair[1].byte);
            assert!(a < b, "transitions must be state-major, byte-ascending");
        }
        assert!(
            transitions
                .iter()
                .all(|t| (t.to as usize) < dfa.state_count())
        );
    }

    #[test]
    fn restarts_after_mismatch_without_losing_overlap() {
        let dfa = compile(&["aab"]);
        assert_eq!(dfa.scan(b"aaab").collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn binary_signatures_are_supported() {
        let set: SignatureSet = [&b"\x00\xff"[..], &b"\x90\x90\x90"[..]]
            .into_iter()
            .collect();
        let dfa = Dfa::compile(&set).unwrap();
        assert!(dfa.is_match(b"xx\x00\xffyy"));
        assert!(dfa.is_match(b"\x90\x90\x90\x90"));
        assert!(!dfa.is_match(b"\x90\x90\x00"));
    }

    #[test]
    fn matches_exposes_current_state() {
        let dfa = compile(&["abc"]);
        let mut it = dfa.scan(b"ab");
        assert_eq!(it.next(), None);
        assert_ne!(it.state(), Dfa::START);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn accepts_iff_some_signature_ends_here(
                signatures in prop::collection::vec(prop::collection::vec(0u8..4, 1..6), 0..8),
                payload in prop::collection::vec(0u8..4, 0..64),
            ) {
                let set: SignatureSet = signatures.iter().collect();
                let dfa = Dfa::compile(&set).unwrap();
                let refs: Vec<&[u8]> = signatures.iter().map(Vec::as_slice).collect();

                let ends: Vec<usize> = dfa.scan(&payload).collect();
                prop_assert_eq!(ends, naive_match_ends(&refs, &payload));
            }

            #[test]
            fn compilation_is_deterministic(
                signatures in prop::collection::vec("[a-d]{1,5}", 0..10),
            ) {
                let set: SignatureSet = signatures.iter().collect();
                let a = Dfa::compile(&set).unwrap();
                let b = Dfa::compile(&set).unwrap();
                prop_assert_eq!(
                    a.transitions().collect::<Vec<_>>(),
                    b.transitions().collect::<Vec<_>>()
                );
            }

            #[test]
            fn every_state_has_256_valid_successors(
                signatures in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..8), 0..6),
            ) {
                let set: SignatureSet = signatures.iter().collect();
                let dfa = Dfa::compile(&set).unwrap();
                for state in 0..dfa.state_count() as StateId {
                    for byte in 0..=255u8 {
                        prop_assert!((dfa.next(state, byte) as usize) < dfa.state_count());
                    }
                }
            }
        }
    }
}
