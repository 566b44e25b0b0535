//! Wire protocol spoken with the rendezvous service.
//!
//! Peer-to-peer negotiation payloads keep the historical field names
//! (`type`/`from`/`to`/`me`/`sdp`) so the service can route them untouched.

use serde::{Deserialize, Serialize};

use crate::link::{SdpKind, SessionDescription};

/// Negotiation message exchanged between participants, routed by the
/// rendezvous service via the `to` field. `from` is stamped by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "call me")]
    CallMe,
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "bye")]
    Bye,
}

impl SignalMessage {
    fn bare(kind: SignalKind) -> Self {
        Self {
            kind,
            from: None,
            to: None,
            me: None,
            sdp: None,
        }
    }

    pub fn join() -> Self {
        Self::bare(SignalKind::Join)
    }

    /// Asks the recipient to send an offer to the participant named `me`.
    pub fn call_me(me: impl Into<String>) -> Self {
        Self {
            me: Some(me.into()),
            ..Self::bare(SignalKind::CallMe)
        }
    }

    pub fn sdp(desc: &SessionDescription) -> Self {
        let kind = match desc.kind {
            SdpKind::Offer => SignalKind::Offer,
            SdpKind::Answer => SignalKind::Answer,
        };
        Self {
            sdp: Some(desc.sdp.clone()),
            ..Self::bare(kind)
        }
    }

    pub fn done() -> Self {
        Self::bare(SignalKind::Done)
    }

    pub fn bye() -> Self {
        Self::bare(SignalKind::Bye)
    }

    /// Reads this message back as a session description, for `offer` and
    /// `answer` messages carrying SDP text.
    pub fn session_description(&self) -> Option<SessionDescription> {
        let kind = match self.kind {
            SignalKind::Offer => SdpKind::Offer,
            SignalKind::Answer => SdpKind::Answer,
            _ => return None,
        };
        Some(SessionDescription {
            kind,
            sdp: self.sdp.clone()?,
        })
    }
}

/// Frames sent by a client to the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Registers this client as a host under `name`. Answered with
    /// [`ServerMessage::CreateHostResult`].
    CreateHost { name: String },
    /// Requests the current host list. Answered with
    /// [`ServerMessage::ListHostsResult`].
    ListHosts,
    /// Fire-and-forget negotiation payload, routed to `payload.to`.
    Message { payload: SignalMessage },
}

/// Frames sent by the rendezvous service to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame after connecting; assigns this client its id.
    Welcome { id: String },
    /// 200 on success, 409 when the host name is taken.
    CreateHostResult { status: u16, message: String },
    ListHostsResult { status: u16, hosts: Vec<HostEntry> },
    Message { payload: SignalMessage },
    /// A participant's signaling connection went away.
    UserDisconnected { id: String },
}

/// One registered host as reported by `list hosts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_me_keeps_the_historical_type_name() {
        let mut msg = SignalMessage::call_me("abc");
        msg.to = Some("xyz".into());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"call me","to":"xyz","me":"abc"}"#);
    }

    #[test]
    fn join_omits_unset_fields() {
        let json = serde_json::to_string(&SignalMessage::join()).unwrap();
        assert_eq!(json, r#"{"type":"join"}"#);
    }

    #[test]
    fn sdp_round_trip() {
        let desc = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0".into(),
        };
        let msg = SignalMessage::sdp(&desc);
        assert_eq!(msg.kind, SignalKind::Offer);
        assert_eq!(msg.session_description(), Some(desc));
    }

    #[test]
    fn answer_without_sdp_is_not_a_description() {
        let msg = SignalMessage::bare(SignalKind::Answer);
        assert_eq!(msg.session_description(), None);
    }

    #[test]
    fn inbound_offer_parses() {
        let json = r#"{"type":"offer","from":"peer-1","to":"peer-2","sdp":"v=0"}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind, SignalKind::Offer);
        assert_eq!(msg.from.as_deref(), Some("peer-1"));
        assert_eq!(msg.sdp.as_deref(), Some("v=0"));
    }

    #[test]
    fn envelope_tags_are_snake_case() {
        let json = serde_json::to_string(&ClientMessage::CreateHost {
            name: "alice".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"create_host","name":"alice"}"#);

        let parsed: ServerMessage =
            serde_json::from_str(r#"{"type":"user_disconnected","id":"peer-3"}"#).unwrap();
        assert_eq!(parsed, ServerMessage::UserDisconnected { id: "peer-3".into() });
    }
}
