//! 제한된 헤더 파싱 — 페이로드 경계 찾기
//!
//! Ethernet → IPv4/IPv6 → TCP/UDP 순서로 헤더를 확인하고 페이로드 시작 오프셋을 계산합니다.
//! 모든 단계에서 선언된 헤더 길이가 남은 프레임 길이 안에 있는지 먼저 검사하며,
//! 검사에 실패하거나 지원하지 않는 프로토콜이면 [`Inspection::Passthrough`]를 반환합니다.
//! 파싱 결과는 전달 여부에 영향을 주지 않습니다. 콘텐츠 분류는 커널 프로그램의 몫입니다.

use xids_ebpf_common::{
    ETH_HLEN, ETH_P_IP, ETH_P_IPV6, IPPROTO_TCP, IPPROTO_UDP, IPV4_MIN_HLEN, IPV6_HLEN,
    TCP_MIN_HLEN, UDP_HLEN,
};

/// 네트워크 계층
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3 {
    Ipv4,
    Ipv6,
}

/// 전송 계층
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4 {
    Tcp,
    Udp,
}

/// 검사 없이 전달하는 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    /// 이더넷 헤더보다 짧음
    TruncatedEthernet,
    /// IPv4/IPv6가 아닌 EtherType (VLAN 포함)
    NonIp(u16),
    /// IP 헤더가 잘림
    TruncatedNetwork,
    /// IPv4 IHL < 5
    InvalidIhl(u8),
    /// TCP/UDP가 아닌 프로토콜
    UnsupportedTransport(u8),
    /// 전송 계층 헤더가 잘림
    TruncatedTransport,
    /// TCP data offset < 5
    InvalidDataOffset(u8),
}

/// 헤더 검사 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inspection {
    /// 페이로드 위치를 찾음 (`offset == len`이면 빈 페이로드)
    Payload { l3: L3, l4: L4, offset: usize },
    /// 검사 없이 그대로 전달
    Passthrough(PassReason),
}

impl Inspection {
    /// 페이로드 시작 오프셋
    pub fn payload_offset(&self) -> Option<usize> {
        match self {
            Self::Payload { offset, .. } => Some(*offset),
            Self::Passthrough(_) => None,
        }
    }
}

/// 프레임의 헤더를 검사합니다.
///
/// `frame` 밖의 바이트는 절대 읽지 않습니다.
pub fn inspect(frame: &[u8]) -> Inspection {
    use Inspection::Passthrough;

    if frame.len() < ETH_HLEN {
        return Passthrough(PassReason::TruncatedEthernet);
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);

    let (l3, proto, mut offset) = match ethertype {
        ETH_P_IP => {
            if frame.len() < ETH_HLEN + IPV4_MIN_HLEN {
                return Passthrough(PassReason::TruncatedNetwork);
            }
            let ihl = frame[ETH_HLEN] & 0x0f;
            if (ihl as usize) * 4 < IPV4_MIN_HLEN {
                return Passthrough(PassReason::InvalidIhl(ihl));
            }
            let hlen = ihl as usize * 4;
            if frame.len() < ETH_HLEN + hlen {
                return Passthrough(PassReason::TruncatedNetwork);
            }
            (L3::Ipv4, frame[ETH_HLEN + 9], ETH_HLEN + hlen)
        }
        ETH_P_IPV6 => {
            if frame.len() < ETH_HLEN + IPV6_HLEN {
                return Passthrough(PassReason::TruncatedNetwork);
            }
            (L3::Ipv6, frame[ETH_HLEN + 6], ETH_HLEN + IPV6_HLEN)
        }
        other => return Passthrough(PassReason::NonIp(other)),
    };

    let l4 = match proto {
        IPPROTO_TCP => {
            if frame.len() < offset + TCP_MIN_HLEN {
                return Passthrough(PassReason::TruncatedTransport);
            }
            let doff = frame[offset + 12] >> 4;
            if (doff as usize) * 4 < TCP_MIN_HLEN {
                return Passthrough(PassReason::InvalidDataOffset(doff));
            }
            let hlen = doff as usize * 4;
            if frame.len() < offset + hlen {
                return Passthrough(PassReason::TruncatedTransport);
            }
            offset += hlen;
            L4::Tcp
        }
        IPPROTO_UDP => {
            if frame.len() < offset + UDP_HLEN {
                return Passthrough(PassReason::TruncatedTransport);
            }
            offset += UDP_HLEN;
            L4::Udp
        }
        other => return Passthrough(PassReason::UnsupportedTransport(other)),
    };

    Inspection::Payload { l3, l4, offset }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn ipv4_tcp_payload_offset() {
        let frame = ipv4_tcp(b"GET /");
        assert_eq!(
            inspect(&frame),
            Inspection::Payload {
                l3: L3::Ipv4,
                l4: L4::Tcp,
                offset: 54
            }
        );
        assert_eq!(&frame[54..], b"GET /");
    }

    #[test]
    fn ipv4_options_and_tcp_options_are_skipped() {
        let frame = ipv4(IPPROTO_TCP, 6, &tcp_header(8), b"x");
        assert_eq!(inspect(&frame).payload_offset(), Some(14 + 24 + 32));
    }

    #[test]
    fn ipv4_udp_and_ipv6_udp() {
        assert_eq!(inspect(&ipv4_udp(b"dns")).payload_offset(), Some(42));
        assert_eq!(inspect(&ipv6_udp(b"dns")).payload_offset(), Some(62));
    }

    #[test]
    fn ipv6_tcp_payload_offset() {
        let frame = ipv6_tcp(b"GET /");
        assert_eq!(
            inspect(&frame),
            Inspection::Payload {
                l3: L3::Ipv6,
                l4: L4::Tcp,
                offset: 74
            }
        );
        let frame = ipv6(IPPROTO_TCP, &tcp_header(8), b"x");
        assert_eq!(inspect(&frame).payload_offset(), Some(14 + 40 + 32));
    }

    #[test]
    fn empty_payload_is_still_inspected() {
        let frame = ipv4_udp(b"");
        assert_eq!(inspect(&frame).payload_offset(), Some(frame.len()));
    }

    #[test]
    fn vlan_and_arp_pass_through() {
        assert_eq!(
            inspect(&non_ip(0x8100, 64)),
            Inspection::Passthrough(PassReason::NonIp(0x8100))
        );
        assert_eq!(
            inspect(&non_ip(0x0806, 42)),
            Inspection::Passthrough(PassReason::NonIp(0x0806))
        );
    }

    #[test]
    fn icmp_passes_through() {
        let frame = ipv4(1, 5, &[0u8; 8], b"ping");
        assert_eq!(
            inspect(&frame),
            Inspection::Passthrough(PassReason::UnsupportedTransport(1))
        );
    }

    #[test]
    fn invalid_header_lengths_pass_through() {
        let frame = ipv4(IPPROTO_TCP, 4, &tcp_header(5), b"");
        assert_eq!(
            inspect(&frame),
            Inspection::Passthrough(PassReason::InvalidIhl(4))
        );
        let frame = ipv4(IPPROTO_TCP, 5, &tcp_header(2), b"");
        assert_eq!(
            inspect(&frame),
            Inspection::Passthrough(PassReason::InvalidDataOffset(2))
        );
    }

    #[test]
    fn truncated_frames_never_inspect_payload() {
        // 각 헤더 경계 직전까지 모든 길이
        for full in [
            ipv4_tcp(b""),
            ipv4_udp(b""),
            ipv6_udp(b""),
            ipv6_tcp(b""),
            ipv4(IPPROTO_TCP, 15, &tcp_header(15), b""),
        ] {
            for len in 0..full.len() {
                let inspection = inspect(&full[..len]);
                assert!(
                    matches!(inspection, Inspection::Passthrough(_)),
                    "len {len} of {} inspected as {inspection:?}",
                    full.len()
                );
            }
            assert!(matches!(inspect(&full), Inspection::Payload { .. }));
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_panics_and_offset_is_in_bounds(frame in prop::collection::vec(any::<u8>(), 0..256)) {
                if let Some(offset) = inspect(&frame).payload_offset() {
                    prop_assert!(offset <= frame.len());
                }
            }

            #[test]
            fn ip_prefixes_never_panic(
                proto in prop_oneof![Just(IPPROTO_TCP), Just(IPPROTO_UDP), any::<u8>()],
                ihl in 0u8..16,
                tail in prop::collection::vec(any::<u8>(), 0..80),
            ) {
                let frame = ipv4(proto, ihl, &tail, b"");
                for len in 0..=frame.len() {
                    if let Some(offset) = inspect(&frame[..len]).payload_offset() {
                        prop_assert!(offset <= len);
                    }
                }
            }
        }
    }
}
