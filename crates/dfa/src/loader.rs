//! 시그니처 로더 — 줄 단위 패턴 파일 읽기
//!
//! 파일 형식:
//! - 한 줄에 시그니처 하나 (`\n` 또는 `\r\n` 종료)
//! - 비어 있거나 공백만 있는 줄은 무시
//! - 이스케이프 문법 없음, 나머지 바이트는 그대로 사용
//! - 중복 시그니처는 처음 등장한 것만 유지
//!
//! ```text
//! /etc/passwd
//! cmd.exe
//! <script>
//! ```

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use xids_core::error::ConfigError;

/// 중복 없는 시그니처 목록 (처음 등장한 순서 유지)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureSet {
    signatures: Vec<Vec<u8>>,
}

impl SignatureSet {
    /// 시그니처 파일을 읽어 로드합니다.
    ///
    /// # 에러
    /// - `ConfigError::SignatureFile`: 파일을 읽을 수 없는 경우
    /// - `ConfigError::NoSignatures`: 유효한 시그니처가 하나도 없는 경우
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| ConfigError::SignatureFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let set = Self::parse(&raw, &path.display().to_string())?;
        info!(
            path = %path.display(),
            signatures = set.len(),
            bytes = set.total_len(),
            "signature file loaded"
        );
        Ok(set)
    }

    /// 파일 내용을 파싱합니다.
    ///
    /// `origin`은 에러 메시지에 사용할 출처 이름입니다.
    pub fn parse(raw: &[u8], origin: &str) -> Result<Self, ConfigError> {
        let lines = raw
            .split(|&b| b == b'\n')
            .map(|line| match line {
                [rest @ .., b'\r'] => rest,
                _ => line,
            })
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace));

        let set: Self = lines.collect();
        if set.is_empty() {
            return Err(ConfigError::NoSignatures {
                path: origin.to_owned(),
            });
        }
        Ok(set)
    }

    /// 시그니처 수
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// 시그니처가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// 시그니처를 로드 순서대로 순회합니다.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[u8]> {
        self.signatures.iter().map(Vec::as_slice)
    }

    /// 전체 시그니처 바이트 길이의 합
    pub fn total_len(&self) -> usize {
        self.signatures.iter().map(Vec::len).sum()
    }
}

impl<S: AsRef<[u8]>> FromIterator<S> for SignatureSet {
    /// 빈 시그니처를 건너뛰고 중복을 제거하며 수집합니다.
    ///
    /// 공백만 있는 시그니처는 그대로 유지합니다. 공백 줄 무시는 파일 형식의 규칙입니다.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut signatures = Vec::new();
        for item in iter {
            let sig = item.as_ref();
            if sig.is_empty() {
                continue;
            }
            if seen.insert(sig.to_vec()) {
                signatures.push(sig.to_vec());
            } else {
                debug!(signature = %String::from_utf8_lossy(sig), "duplicate signature ignored");
            }
        }
        Self { signatures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(set: &SignatureSet) -> Vec<&[u8]> {
        set.iter().collect()
    }

    #[test]
    fn parse_skips_blank_lines_and_dedups() {
        let set = SignatureSet::parse(b"cat\n\nattack\n   \ncat\ntac\n", "test").unwrap();
        assert_eq!(
            collect(&set),
            vec![&b"cat"[..], &b"attack"[..], &b"tac"[..]]
        );
    }

    #[test]
    fn parse_strips_crlf_but_keeps_inner_spaces() {
        let set = SignatureSet::parse(b"GET / HTTP\r\n select \r\n", "test").unwrap();
        assert_eq!(collect(&set), vec![&b"GET / HTTP"[..], &b" select "[..]]);
    }

    #[test]
    fn parse_handles_missing_trailing_newline() {
        let set = SignatureSet::parse(b"one\ntwo", "test").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.total_len(), 6);
    }

    #[test]
    fn parse_keeps_non_utf8_bytes() {
        let set = SignatureSet::parse(b"\xff\xfe\x00\n", "test").unwrap();
        assert_eq!(collect(&set), vec![&b"\xff\xfe\x00"[..]]);
    }

    #[test]
    fn parse_empty_input_is_error() {
        let err = SignatureSet::parse(b"\n \n\r\n", "patterns.txt").unwrap_err();
        assert!(matches!(err, ConfigError::NoSignatures { ref path } if path == "patterns.txt"));
    }

    #[test]
    fn from_iter_allows_empty_set() {
        let set: SignatureSet = Vec::<&str>::new().into_iter().collect();
        assert!(set.is_empty());
    }

    #[test]
    fn from_iter_keeps_whitespace_signatures() {
        let set: SignatureSet = [" ", "", "\t\t", " "].into_iter().collect();
        assert_eq!(collect(&set), vec![&b" "[..], &b"\t\t"[..]]);
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.txt");
        tokio::fs::write(&path, "cmd.exe\n/etc/passwd\n").await.unwrap();

        let set = SignatureSet::load(&path).await.unwrap();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn load_missing_file_is_signature_file_error() {
        let err = SignatureSet::load("/nonexistent/xids/patterns.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::SignatureFile { .. }));
    }
}
