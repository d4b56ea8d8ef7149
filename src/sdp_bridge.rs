//! SDP serializer/deserializer glue (spec.md §6): the escaped-newline wire
//! transform, and extraction of the fields the core needs out of a parsed
//! `sdp::SessionDescription`. Structural SDP parsing itself is delegated to
//! the `sdp` crate, an external collaborator per spec.md §1.

use rand::distributions::{Alphanumeric, DistString};
use sdp::description::media::MediaDescription;
use sdp::description::session::{Origin, SessionDescription};

use crate::certificate::DtlsFingerprint;
use crate::error::{Error, Result};
use crate::session::transceiver::{Kind, Transceiver};

/// Escapes canonical CRLF line endings as the literal two-character
/// sequence `\r\n` (and bare `\n` as `\n`), the form the signaling channel
/// transports SDP in (spec.md §6, §8 "Round-trip" law).
pub fn serialize_sdp_newline(sdp_text: &str) -> String {
    sdp_text.replace("\r\n", "\\r\\n").replace('\n', "\\n")
}

/// Inverse of [`serialize_sdp_newline`]: restores canonical CRLF.
pub fn deserialize_sdp_newline(wire: &str) -> String {
    wire.replace("\\r\\n", "\r\n").replace("\\n", "\n")
}

/// A local ICE username fragment: 4 characters (spec.md §3).
pub fn generate_ice_ufrag() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), 4)
}

/// A local ICE password: 24 characters (spec.md §3).
pub fn generate_ice_pwd() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), 24)
}

/// The subset of remote-SDP fields the session orchestrator needs
/// (spec.md §6): ufrag, pwd, fingerprint, and any trickled candidates,
/// per media section.
#[derive(Debug, Clone, Default)]
pub struct RemoteMediaSection {
    pub kind: Option<Kind>,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub fingerprint: Option<DtlsFingerprint>,
    pub ssrc: Option<u32>,
    pub twcc_ext_id: Option<u8>,
    pub codecs: Vec<String>,
    pub candidates: Vec<String>,
}

/// Extracts the (at most one audio, at most one video) media sections from
/// a remote offer/answer. spec.md §9 "Open questions" leaves multiple
/// sections of the same kind undefined; this implementation rejects them
/// outright (see DESIGN.md).
pub fn extract_media_sections(desc: &SessionDescription) -> Result<Vec<RemoteMediaSection>> {
    let mut sections = Vec::new();
    let mut seen_audio = false;
    let mut seen_video = false;

    for media in &desc.media_descriptions {
        let kind = match media.media_name.media.as_str() {
            "audio" => Kind::Audio,
            "video" => Kind::Video,
            _ => continue,
        };
        match kind {
            Kind::Audio if seen_audio => {
                return Err(Error::ErrMultipleMediaSections("audio"));
            }
            Kind::Video if seen_video => {
                return Err(Error::ErrMultipleMediaSections("video"));
            }
            Kind::Audio => seen_audio = true,
            Kind::Video => seen_video = true,
        }

        let mut section = RemoteMediaSection {
            kind: Some(kind),
            ..Default::default()
        };

        for attr in &media.attributes {
            match attr.key.as_str() {
                "ice-ufrag" => section.ice_ufrag = attr.value.clone().unwrap_or_default(),
                "ice-pwd" => section.ice_pwd = attr.value.clone().unwrap_or_default(),
                "fingerprint" => {
                    if let Some(v) = &attr.value {
                        if let Some((algo, digest)) = v.split_once(' ') {
                            section.fingerprint = Some(DtlsFingerprint {
                                algorithm: algo.to_owned(),
                                value: digest.to_owned(),
                            });
                        }
                    }
                }
                "ssrc" => {
                    if section.ssrc.is_none() {
                        if let Some(v) = &attr.value {
                            if let Some(first) = v.split_whitespace().next() {
                                section.ssrc = first.parse().ok();
                            }
                        }
                    }
                }
                "extmap" => {
                    if let Some(v) = &attr.value {
                        if v.contains("transport-wide-cc") {
                            if let Some(id) = v.split_whitespace().next() {
                                section.twcc_ext_id = id.parse().ok();
                            }
                        }
                    }
                }
                "candidate" => section.candidates.push(attr.value.clone().unwrap_or_default()),
                "rtpmap" => {
                    if let Some(v) = &attr.value {
                        if let Some(name) = v.split_whitespace().nth(1) {
                            section.codecs.push(name.to_owned());
                        }
                    }
                }
                _ => {}
            }
        }

        if section.ice_ufrag.is_empty() {
            return Err(Error::ErrMissingSdpAttribute("ice-ufrag"));
        }
        if section.ice_pwd.is_empty() {
            return Err(Error::ErrMissingSdpAttribute("ice-pwd"));
        }

        sections.push(section);
    }

    Ok(sections)
}

/// Session-level values the local offer/answer is built from (spec.md §4.3,
/// §4.7). `setup` follows RFC 4145: a viewer's offer is `actpass`, a
/// master's answer resolves to the role it actually takes (`active` as the
/// DTLS client, `passive` as the server).
pub struct LocalSessionParams<'a> {
    pub ice_ufrag: &'a str,
    pub ice_pwd: &'a str,
    pub fingerprint: &'a DtlsFingerprint,
    pub setup: &'static str,
}

/// One transceiver's contribution to a media section: the codec name
/// (`"H264"`, `"opus"`, ...) negotiation picked, since `Transceiver` itself
/// only stores the payload type and clock rate.
pub struct MediaSectionInput<'a> {
    pub transceiver: &'a Transceiver,
    pub codec_name: &'a str,
}

/// Assembles a local SDP offer/answer from session-level parameters plus
/// one media section per transceiver (spec.md §4.3 "SDP offer/answer",
/// §6). Candidates are not embedded here: this endpoint trickles ICE
/// candidates over signaling rather than gathering synchronously before
/// the first offer/answer (spec.md §6).
pub fn build_local_description(
    params: &LocalSessionParams<'_>,
    sections: &[MediaSectionInput<'_>],
) -> SessionDescription {
    let mut desc = SessionDescription {
        version: 0,
        origin: Origin {
            username: "-".to_owned(),
            session_id: rand::random::<u32>() as u64,
            session_version: 2,
            network_type: "IN".to_owned(),
            address_type: "IP4".to_owned(),
            unicast_address: "0.0.0.0".to_owned(),
        },
        session_name: "-".to_owned(),
        ..Default::default()
    };
    desc.time_descriptions.push(Default::default());

    for (idx, section) in sections.iter().enumerate() {
        let t = section.transceiver;
        let media_kind = match t.kind {
            Kind::Audio => "audio",
            Kind::Video => "video",
        };

        let direction_attr = match t.direction {
            crate::session::transceiver::Direction::SendOnly => "sendonly",
            crate::session::transceiver::Direction::RecvOnly => "recvonly",
            crate::session::transceiver::Direction::SendRecv => "sendrecv",
        };

        let mut media = MediaDescription::new_jsep_media_description(media_kind.to_owned(), vec![])
            .with_ice_credentials(params.ice_ufrag.to_owned(), params.ice_pwd.to_owned())
            .with_fingerprint(
                params.fingerprint.algorithm.clone(),
                params.fingerprint.value.clone(),
            )
            .with_value_attribute("setup".to_owned(), params.setup.to_owned())
            .with_value_attribute("mid".to_owned(), idx.to_string())
            .with_property_attribute(direction_attr.to_owned())
            .with_property_attribute("rtcp-mux".to_owned())
            .with_codec(t.payload_type, section.codec_name.to_owned(), t.clock_rate, 0, String::new())
            .with_media_source(t.send_ssrc, "kvswebrtc".to_owned(), t.stream_id.clone(), t.track_id.clone());

        if let Some(rtx_pt) = t.rtx_payload_type {
            media = media
                .with_codec(rtx_pt, "rtx".to_owned(), t.clock_rate, 0, format!("apt={}", t.payload_type));
        }

        if t.twcc_ext_id.is_some() {
            media = media.with_transport_cc_extmap();
        }

        desc.media_descriptions.push(media);
    }

    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_round_trips() {
        let canonical = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\n";
        let wire = serialize_sdp_newline(canonical);
        assert!(!wire.contains('\r') && !wire.contains('\n'));
        assert_eq!(deserialize_sdp_newline(&wire), canonical);
    }

    #[test]
    fn ufrag_and_pwd_have_spec_lengths() {
        assert_eq!(generate_ice_ufrag().len(), 4);
        assert_eq!(generate_ice_pwd().len(), 24);
    }
}
