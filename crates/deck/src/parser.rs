//! ContentParser: conversation and assets to an ordered slide spec sequence
//!
//! Pure and deterministic. Chart association is explicit first (a turn
//! listing chart ids, or a chart naming its turn); the rest follows the
//! configured [`ChartAssociation`] policy.

use std::collections::{HashMap, HashSet};

use crate::config::{ChartAssociation, ParsingConfig};
use crate::error::ParseError;
use crate::model::{BodyHints, DeckInput, ParsedDeck, SlideKind, SlideSpec};
use crate::text::{squash_whitespace, truncate_chars};

const SOURCES_HEADING: &str = "Sources";
const DEFAULT_SUBTITLE: &str = "Generated presentation";

#[derive(Debug, Clone, Default)]
pub struct ContentParser {
    config: ParsingConfig,
}

impl ContentParser {
    pub fn new(config: ParsingConfig) -> Self {
        Self { config }
    }

    pub fn parse(&self, input: &DeckInput) -> Result<ParsedDeck, ParseError> {
        let turns = &input.conversation;
        if turns.is_empty() {
            return Err(ParseError::EmptyConversation);
        }

        for (i, turn) in turns.iter().enumerate() {
            if turn.question.trim().is_empty() {
                return Err(ParseError::MissingText { turn: i, field: "question" });
            }
            if turn.answer.trim().is_empty() {
                return Err(ParseError::MissingText { turn: i, field: "answer" });
            }
        }

        let per_turn = self.associate_charts(input)?;

        let title = self.derive_title(input);
        let subtitle = {
            let name = squash_whitespace(&input.user_name);
            if name.is_empty() {
                DEFAULT_SUBTITLE.to_string()
            } else {
                truncate_chars(&name, self.config.subtitle_chars)
            }
        };

        let mut slide_specs = Vec::with_capacity(turns.len() + 2);
        slide_specs.push(SlideSpec {
            index: 0,
            kind: SlideKind::Title,
            heading: title.clone(),
            body_hints: BodyHints::Subtitle { text: subtitle.clone() },
            chart_refs: Vec::new(),
        });

        for (i, (turn, chart_refs)) in turns.iter().zip(per_turn).enumerate() {
            slide_specs.push(SlideSpec {
                index: i + 1,
                kind: SlideKind::Content,
                heading: truncate_chars(&squash_whitespace(&turn.question), self.config.heading_chars),
                body_hints: BodyHints::QuestionAnswer {
                    question: turn.question.trim().to_string(),
                    answer: turn.answer.trim().to_string(),
                },
                chart_refs,
            });
        }

        if !input.sources.is_empty() {
            slide_specs.push(SlideSpec {
                index: slide_specs.len(),
                kind: SlideKind::Sources,
                heading: SOURCES_HEADING.to_string(),
                body_hints: BodyHints::Sources {
                    items: input.sources.clone(),
                },
                chart_refs: Vec::new(),
            });
        }

        tracing::info!(
            "[PARSER] {} turn(s), {} chart(s), {} source(s) -> {} slide spec(s)",
            turns.len(),
            input.charts.len(),
            input.sources.len(),
            slide_specs.len()
        );

        Ok(ParsedDeck {
            title,
            subtitle,
            slide_specs,
        })
    }

    fn derive_title(&self, input: &DeckInput) -> String {
        if let Some(title) = input.title.as_deref().map(squash_whitespace).filter(|t| !t.is_empty()) {
            return truncate_chars(&title, self.config.title_chars);
        }

        let first = squash_whitespace(&input.conversation[0].question);
        let remaining = input.conversation.len() - 1;
        let title = if remaining > 0 {
            format!("{} (+{} more)", first, remaining)
        } else {
            first
        };
        truncate_chars(&title, self.config.title_chars)
    }

    /// Chart ids per turn, explicit references first, then the rest in asset order
    fn associate_charts(&self, input: &DeckInput) -> Result<Vec<Vec<String>>, ParseError> {
        let turns = input.conversation.len();

        let mut known = HashSet::new();
        for chart in &input.charts {
            if !known.insert(chart.id.as_str()) {
                return Err(ParseError::DuplicateChartId(chart.id.clone()));
            }
            if let Some(turn) = chart.turn {
                if turn >= turns {
                    return Err(ParseError::ChartTurnOutOfRange {
                        chart_id: chart.id.clone(),
                        turn,
                        turns,
                    });
                }
            }
        }

        let mut assigned: HashMap<&str, usize> = HashMap::new();

        for (i, turn) in input.conversation.iter().enumerate() {
            for chart_id in &turn.chart_refs {
                if !known.contains(chart_id.as_str()) {
                    return Err(ParseError::UnknownChart {
                        turn: i,
                        chart_id: chart_id.clone(),
                    });
                }
                if assigned.insert(chart_id.as_str(), i).is_some() {
                    return Err(ParseError::ChartAssociatedTwice {
                        chart_id: chart_id.clone(),
                    });
                }
            }
        }

        for chart in &input.charts {
            if let Some(turn) = chart.turn {
                match assigned.get(chart.id.as_str()) {
                    Some(&existing) if existing != turn => {
                        return Err(ParseError::ChartAssociatedTwice {
                            chart_id: chart.id.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        assigned.insert(chart.id.as_str(), turn);
                    }
                }
            }
        }

        let mut previous: Option<usize> = None;
        for chart in &input.charts {
            if let Some(&turn) = assigned.get(chart.id.as_str()) {
                previous = Some(turn);
                continue;
            }

            let turn = match self.config.chart_association {
                ChartAssociation::Preceding => previous.unwrap_or(0),
                ChartAssociation::First => 0,
                ChartAssociation::Last => turns - 1,
                ChartAssociation::Strict => {
                    return Err(ParseError::UnassociatedChart {
                        chart_id: chart.id.clone(),
                    });
                }
            };
            tracing::debug!("[PARSER] chart '{}' attached to turn {} by policy", chart.id, turn);
            assigned.insert(chart.id.as_str(), turn);
            previous = Some(turn);
        }

        let mut per_turn: Vec<Vec<String>> = input
            .conversation
            .iter()
            .map(|turn| turn.chart_refs.clone())
            .collect();
        for chart in &input.charts {
            if let Some(&turn) = assigned.get(chart.id.as_str()) {
                if !per_turn[turn].contains(&chart.id) {
                    per_turn[turn].push(chart.id.clone());
                }
            }
        }

        Ok(per_turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChartAsset, ConversationTurn, Source};

    fn parser(policy: ChartAssociation) -> ContentParser {
        ContentParser::new(ParsingConfig {
            chart_association: policy,
            ..ParsingConfig::default()
        })
    }

    fn three_turns() -> DeckInput {
        DeckInput::new("alice", "t-1")
            .with_turn(ConversationTurn::new("What happened in Q1?", "Revenue grew."))
            .with_turn(ConversationTurn::new("And Q2?", "Flat."))
            .with_turn(ConversationTurn::new("Outlook?", "Positive."))
    }

    #[test]
    fn title_first_sources_last() {
        let input = three_turns().with_source(Source::new("Report", Some("https://example.com".into())));
        let deck = ContentParser::default().parse(&input).unwrap();

        assert_eq!(deck.slide_specs.len(), 5);
        assert_eq!(deck.slide_specs[0].kind, SlideKind::Title);
        assert_eq!(deck.slide_specs[0].index, 0);
        assert_eq!(deck.slide_specs[4].kind, SlideKind::Sources);
        for (i, spec) in deck.slide_specs.iter().enumerate() {
            assert_eq!(spec.index, i);
        }
        assert_eq!(deck.title, "What happened in Q1? (+2 more)");
        assert_eq!(deck.subtitle, "alice");
    }

    #[test]
    fn no_sources_slide_without_sources() {
        let deck = ContentParser::default().parse(&three_turns()).unwrap();
        assert_eq!(deck.slide_specs.len(), 4);
        assert!(deck.slide_specs.iter().all(|s| s.kind != SlideKind::Sources));
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let err = ContentParser::default().parse(&DeckInput::new("a", "t")).unwrap_err();
        assert!(matches!(err, ParseError::EmptyConversation));
    }

    #[test]
    fn missing_answer_is_rejected() {
        let input = DeckInput::new("a", "t").with_turn(ConversationTurn::new("Q?", "   "));
        let err = ContentParser::default().parse(&input).unwrap_err();
        assert!(matches!(err, ParseError::MissingText { turn: 0, field: "answer" }));
    }

    #[test]
    fn unknown_chart_reference_is_rejected() {
        let input = DeckInput::new("a", "t")
            .with_turn(ConversationTurn::new("Q?", "A.").with_chart("ghost"));
        let err = ContentParser::default().parse(&input).unwrap_err();
        assert!(matches!(err, ParseError::UnknownChart { turn: 0, .. }));
    }

    #[test]
    fn explicit_turn_association_is_honoured() {
        let input = three_turns()
            .with_chart(ChartAsset::new("a", vec![1]).for_turn(1))
            .with_chart(ChartAsset::new("b", vec![2]).for_turn(1));
        let deck = ContentParser::default().parse(&input).unwrap();

        assert_eq!(deck.slide_specs[2].chart_refs, vec!["a", "b"]);
        assert!(deck.slide_specs[1].chart_refs.is_empty());
    }

    #[test]
    fn turn_references_come_before_declared_charts() {
        let mut input = three_turns()
            .with_chart(ChartAsset::new("a", vec![1]).for_turn(2))
            .with_chart(ChartAsset::new("b", vec![2]));
        input.conversation[2].chart_refs.push("b".to_string());

        let deck = ContentParser::default().parse(&input).unwrap();
        assert_eq!(deck.slide_specs[3].chart_refs, vec!["b", "a"]);
    }

    #[test]
    fn unassociated_charts_follow_policy() {
        let input = three_turns()
            .with_chart(ChartAsset::new("a", vec![1]).for_turn(2))
            .with_chart(ChartAsset::new("b", vec![2]));

        let preceding = parser(ChartAssociation::Preceding).parse(&input).unwrap();
        assert_eq!(preceding.slide_specs[3].chart_refs, vec!["a", "b"]);

        let first = parser(ChartAssociation::First).parse(&input).unwrap();
        assert_eq!(first.slide_specs[1].chart_refs, vec!["b"]);

        let last = parser(ChartAssociation::Last).parse(&input).unwrap();
        assert_eq!(last.slide_specs[3].chart_refs, vec!["a", "b"]);

        let strict = parser(ChartAssociation::Strict).parse(&input).unwrap_err();
        assert!(matches!(strict, ParseError::UnassociatedChart { chart_id } if chart_id == "b"));
    }

    #[test]
    fn preceding_defaults_to_first_content_slide() {
        let input = three_turns().with_chart(ChartAsset::new("lonely", vec![1]));
        let deck = ContentParser::default().parse(&input).unwrap();
        assert_eq!(deck.slide_specs[1].chart_refs, vec!["lonely"]);
    }

    #[test]
    fn conflicting_and_duplicate_charts_are_rejected() {
        let mut input = three_turns().with_chart(ChartAsset::new("a", vec![1]).for_turn(0));
        input.conversation[1].chart_refs.push("a".to_string());
        assert!(matches!(
            ContentParser::default().parse(&input),
            Err(ParseError::ChartAssociatedTwice { .. })
        ));

        let dup = three_turns()
            .with_chart(ChartAsset::new("a", vec![1]))
            .with_chart(ChartAsset::new("a", vec![2]));
        assert!(matches!(
            ContentParser::default().parse(&dup),
            Err(ParseError::DuplicateChartId(_))
        ));

        let out_of_range = three_turns().with_chart(ChartAsset::new("a", vec![1]).for_turn(7));
        assert!(matches!(
            ContentParser::default().parse(&out_of_range),
            Err(ParseError::ChartTurnOutOfRange { turn: 7, turns: 3, .. })
        ));
    }

    #[test]
    fn title_and_heading_are_truncated() {
        let long = "word ".repeat(50);
        let input = DeckInput::new("", "t").with_turn(ConversationTurn::new(long, "A."));
        let deck = ContentParser::default().parse(&input).unwrap();

        assert_eq!(deck.title.chars().count(), 60);
        assert!(deck.slide_specs[1].heading.chars().count() <= 90);
        assert_eq!(deck.subtitle, DEFAULT_SUBTITLE);
    }

    #[test]
    fn title_override_wins() {
        let mut input = three_turns();
        input.title = Some("Quarterly review".to_string());
        let deck = ContentParser::default().parse(&input).unwrap();
        assert_eq!(deck.title, "Quarterly review");
        assert_eq!(deck.slide_specs[0].heading, "Quarterly review");
    }

    #[test]
    fn parsing_is_deterministic() {
        let input = three_turns()
            .with_chart(ChartAsset::new("a", vec![1]))
            .with_source(Source::new("S", None));
        let parser = ContentParser::default();
        assert_eq!(parser.parse(&input).unwrap(), parser.parse(&input).unwrap());
    }
}
