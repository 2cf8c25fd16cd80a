/// One `m=` media section's payload-type list plus the transport string
/// needed to decide whether codec filtering applies to it at all (only
/// `RTP/AVP` and `RTP/SAVP` sections are touched; others pass through
/// unexamined, per the original's explicit transport check).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaSection {
    pub transport: String,
    pub payload_types: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SdpBody {
    pub sections: Vec<MediaSection>,
    /// Free-form trailing attribute lines appended by NAT handling
    /// (`a=nated:yes`) — kept as raw text since this workspace does not
    /// implement full SDP attribute parsing.
    pub extra_lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpFilterOutcome {
    Ok,
    /// Every payload type in some section was filtered out — the
    /// original responds `488 Not Acceptable Here` and kills the call.
    NoAcceptableCodecs,
}

/// Drop any payload type not present in `allowed`, per media section.
/// Sections using a transport other than `RTP/AVP`/`RTP/SAVP` are left
/// untouched. If filtering empties a section's codec list entirely, the
/// whole body is rejected — a half-filtered, still-viable body that
/// merely lost some sections worth of codecs is not an error by itself.
pub fn filter_codecs(body: &mut SdpBody, allowed: &[u8]) -> SdpFilterOutcome {
    for section in &mut body.sections {
        let transport = section.transport.to_ascii_lowercase();
        if transport != "rtp/avp" && transport != "rtp/savp" {
            continue;
        }
        section.payload_types.retain(|pt| allowed.contains(pt));
        if section.payload_types.is_empty() {
            return SdpFilterOutcome::NoAcceptableCodecs;
        }
    }
    SdpFilterOutcome::Ok
}

/// `cld` prefixed with `nat-` means the caller is behind a NAT the proxy
/// already detected; strip the prefix and tag the SDP body so the far
/// end's media handling knows to expect symmetric RTP. Mirrors the
/// original's `cld.startswith('nat-')` branch exactly, including that the
/// tag is only added when a body is actually present.
pub fn apply_nat_tag(cld: &str, body: &mut Option<SdpBody>) -> String {
    match cld.strip_prefix("nat-") {
        Some(rest) => {
            if let Some(body) = body {
                body.extra_lines.push("a=nated:yes".to_string());
            }
            rest.to_string()
        }
        None => cld.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(transport: &str, pts: &[u8]) -> MediaSection {
        MediaSection {
            transport: transport.to_string(),
            payload_types: pts.to_vec(),
        }
    }

    #[test]
    fn filter_codecs_drops_disallowed_payload_types() {
        let mut body = SdpBody {
            sections: vec![section("RTP/AVP", &[0, 8, 9])],
            extra_lines: vec![],
        };
        let outcome = filter_codecs(&mut body, &[0, 8]);
        assert_eq!(outcome, SdpFilterOutcome::Ok);
        assert_eq!(body.sections[0].payload_types, vec![0, 8]);
    }

    #[test]
    fn filter_codecs_rejects_body_when_a_section_is_emptied() {
        let mut body = SdpBody {
            sections: vec![section("RTP/AVP", &[9])],
            extra_lines: vec![],
        };
        let outcome = filter_codecs(&mut body, &[0, 8]);
        assert_eq!(outcome, SdpFilterOutcome::NoAcceptableCodecs);
    }

    #[test]
    fn filter_codecs_ignores_non_rtp_sections() {
        let mut body = SdpBody {
            sections: vec![section("UDP/BFCP", &[100])],
            extra_lines: vec![],
        };
        let outcome = filter_codecs(&mut body, &[0, 8]);
        assert_eq!(outcome, SdpFilterOutcome::Ok);
        assert_eq!(body.sections[0].payload_types, vec![100]);
    }

    #[test]
    fn apply_nat_tag_strips_prefix_and_tags_body() {
        let mut body = Some(SdpBody::default());
        let cld = apply_nat_tag("nat-18005551212", &mut body);
        assert_eq!(cld, "18005551212");
        assert_eq!(body.unwrap().extra_lines, vec!["a=nated:yes".to_string()]);
    }

    #[test]
    fn apply_nat_tag_is_a_no_op_without_the_prefix() {
        let mut body: Option<SdpBody> = None;
        let cld = apply_nat_tag("18005551212", &mut body);
        assert_eq!(cld, "18005551212");
        assert!(body.is_none());
    }

    #[test]
    fn apply_nat_tag_does_not_tag_a_missing_body() {
        let mut body: Option<SdpBody> = None;
        apply_nat_tag("nat-18005551212", &mut body);
        assert!(body.is_none());
    }
}
