use crate::{
    colors::ColorAssigner,
    payload::InboundPayload,
    transcript::Transcript,
    types::{ChatRecord, Participant, TranscriptEntry},
    watermark::Watermark,
};

/// One routing step produced from an inbound payload.
///
/// Steps are emitted in a fixed order regardless of field order on the wire:
/// ping ack, chat, presence, ladder update, players, match history, history
/// pull request, ping request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    PingAck { stamp: String },
    ChatAppended { entries: Vec<TranscriptEntry> },
    PresenceReplaced { participants: Vec<Participant> },
    LadderRefresh,
    PlayersHtml { html: String },
    MatchHistoryHtml { html: String },
    HistoryRequested { since: i64, refresh_ladder: bool },
    PingRequested { stamp: String },
}

/// Classifies inbound payloads and owns the chat-side state they mutate.
///
/// Colors, watermark and transcript live for the whole session and are not
/// reset across reconnects.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    colors: ColorAssigner,
    watermark: Watermark,
    transcript: Transcript,
    presence: Vec<String>,
}

impl MessageRouter {
    pub fn new(transcript_max_items: usize) -> Self {
        Self {
            colors: ColorAssigner::default(),
            watermark: Watermark::default(),
            transcript: Transcript::new(transcript_max_items),
            presence: Vec::new(),
        }
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn presence(&self) -> &[String] {
        &self.presence
    }

    pub fn colors(&self) -> &ColorAssigner {
        &self.colors
    }

    pub fn route(&mut self, payload: InboundPayload) -> Vec<Dispatch> {
        let mut steps = Vec::new();

        if let Some(stamp) = payload.ping {
            steps.push(Dispatch::PingAck { stamp });
        }
        if !payload.chat.is_empty() {
            let entries = self.append_chat(payload.chat);
            if !entries.is_empty() {
                steps.push(Dispatch::ChatAppended { entries });
            }
        }
        if let Some(names) = payload.presence {
            let participants = self.replace_presence(names);
            steps.push(Dispatch::PresenceReplaced { participants });
        }
        if payload.ladder_updated {
            steps.push(Dispatch::LadderRefresh);
        }
        if let Some(html) = payload.players {
            steps.push(Dispatch::PlayersHtml { html });
        }
        if let Some(html) = payload.match_history {
            steps.push(Dispatch::MatchHistoryHtml { html });
        }
        if payload.get_chat_history {
            steps.push(Dispatch::HistoryRequested {
                since: self.watermark.value(),
                refresh_ladder: self.watermark.is_set(),
            });
        }
        if let Some(stamp) = payload.ping_back {
            steps.push(Dispatch::PingRequested { stamp });
        }

        steps
    }

    fn append_chat(&mut self, records: Vec<ChatRecord>) -> Vec<TranscriptEntry> {
        let mut appended = Vec::new();
        for record in records {
            let color = self.colors.color_for(&record.name);
            let Some(body) = record.body else {
                continue;
            };
            let entry = TranscriptEntry {
                timestamp: record.timestamp,
                name: record.name,
                body,
                color: color.to_owned(),
            };
            if self.transcript.append(entry.clone()) {
                self.watermark.advance(entry.timestamp);
                appended.push(entry);
            }
        }
        appended
    }

    fn replace_presence(&mut self, names: Vec<String>) -> Vec<Participant> {
        let mut ordered: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !ordered.contains(&name) {
                ordered.push(name);
            }
        }

        let participants = ordered
            .iter()
            .map(|name| Participant {
                name: name.clone(),
                color: self.colors.color_for(name).to_owned(),
            })
            .collect();
        self.presence = ordered;
        participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{colors::PALETTE, payload::parse_inbound, types::ChatBody};

    fn route(router: &mut MessageRouter, raw: &str) -> Vec<Dispatch> {
        router.route(parse_inbound(raw).expect("test payload should decode"))
    }

    #[test]
    fn watermark_keeps_max_across_payloads() {
        let mut router = MessageRouter::new(100);
        route(&mut router, r#"{"chat":[{"t":100,"n":"A","m":"hi"}]}"#);
        route(&mut router, r#"{"chat":[{"t":90,"n":"B","m":"yo"}]}"#);
        assert_eq!(router.watermark().value(), 100);
        assert_eq!(router.transcript().len(), 2);
    }

    #[test]
    fn watermark_takes_max_within_one_batch() {
        let mut router = MessageRouter::new(100);
        route(
            &mut router,
            r#"{"chat":[{"t":50,"n":"A","m":"1"},{"t":70,"n":"A","m":"2"},{"t":60,"n":"B","m":"3"}]}"#,
        );
        assert_eq!(router.watermark().value(), 70);
    }

    #[test]
    fn colors_records_and_skips_bodyless_ones() {
        let mut router = MessageRouter::new(100);
        let steps = route(
            &mut router,
            r#"{"chat":[{"t":1,"n":"ghost"},{"t":2,"n":"A","m":"hi"}]}"#,
        );
        let Dispatch::ChatAppended { entries } = &steps[0] else {
            panic!("unexpected steps: {steps:?}");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].color, PALETTE[1]);
        assert_eq!(router.colors().get("ghost"), Some(PALETTE[0]));
        assert_eq!(router.watermark().value(), 2);
    }

    #[test]
    fn duplicate_history_records_are_not_reappended() {
        let mut router = MessageRouter::new(100);
        route(&mut router, r#"{"chat":[{"t":10,"n":"A","m":"hi"}]}"#);
        let steps = route(
            &mut router,
            r#"{"chat":[{"t":10,"n":"A","m":"hi"},{"t":11,"n":"A","s":"left"}]}"#,
        );
        assert_eq!(
            steps,
            vec![Dispatch::ChatAppended {
                entries: vec![TranscriptEntry {
                    timestamp: 11,
                    name: "A".into(),
                    body: ChatBody::System("left".into()),
                    color: PALETTE[0].into(),
                }]
            }]
        );
    }

    #[test]
    fn only_duplicates_produce_no_chat_step() {
        let mut router = MessageRouter::new(100);
        route(&mut router, r#"{"chat":[{"t":10,"n":"A","m":"hi"}]}"#);
        assert!(route(&mut router, r#"{"chat":[{"t":10,"n":"A","m":"hi"}]}"#).is_empty());
    }

    #[test]
    fn presence_is_replaced_wholesale_and_colored() {
        let mut router = MessageRouter::new(100);
        route(&mut router, r#"{"presence":["A","B","A"]}"#);
        assert_eq!(router.presence(), ["A", "B"]);
        let steps = route(&mut router, r#"{"presence":["C"]}"#);
        assert_eq!(router.presence(), ["C"]);
        assert_eq!(
            steps,
            vec![Dispatch::PresenceReplaced {
                participants: vec![Participant {
                    name: "C".into(),
                    color: PALETTE[2].into(),
                }]
            }]
        );
    }

    #[test]
    fn steps_follow_fixed_order() {
        let mut router = MessageRouter::new(100);
        let steps = route(
            &mut router,
            r#"{"ping_back":7,"get_chat_history":true,"match_history":"<mh/>","players":"<p/>",
               "ladder_updated":true,"presence":["A"],"chat":[{"t":3,"n":"A","m":"x"}],"ping":6}"#,
        );
        let kinds: Vec<&str> = steps
            .iter()
            .map(|step| match step {
                Dispatch::PingAck { .. } => "ping",
                Dispatch::ChatAppended { .. } => "chat",
                Dispatch::PresenceReplaced { .. } => "presence",
                Dispatch::LadderRefresh => "ladder",
                Dispatch::PlayersHtml { .. } => "players",
                Dispatch::MatchHistoryHtml { .. } => "match_history",
                Dispatch::HistoryRequested { .. } => "history",
                Dispatch::PingRequested { .. } => "ping_back",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "ping",
                "chat",
                "presence",
                "ladder",
                "players",
                "match_history",
                "history",
                "ping_back"
            ]
        );
        // the chat step ran first, so the history pull sees the new watermark
        assert!(steps.contains(&Dispatch::HistoryRequested {
            since: 3,
            refresh_ladder: true
        }));
    }

    #[test]
    fn history_pull_without_watermark_skips_ladder_refresh() {
        let mut router = MessageRouter::new(100);
        let steps = route(&mut router, r#"{"get_chat_history":1}"#);
        assert_eq!(
            steps,
            vec![Dispatch::HistoryRequested {
                since: 0,
                refresh_ladder: false
            }]
        );
    }
}
