use super::{Claim, Subtopic, Taxonomy, Topic};
use crate::model::{Comment, SortStrategy};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// Read-only display view of a subtopic
#[derive(Debug, Clone, Copy)]
pub struct SubtopicView<'a> {
    pub subtopic: &'a Subtopic,
    pub count: usize,
}

/// Read-only display view of a topic with its non-empty subtopics in order
#[derive(Debug, Clone)]
pub struct TopicView<'a> {
    pub topic: &'a Topic,
    pub subtopics: Vec<SubtopicView<'a>>,
    pub count: usize,
}

/// Display ordering: topics and subtopics by count, descending, empties
/// dropped. Ties keep taxonomy order. The taxonomy itself is not touched.
///
/// `NumClaims` counts claims including nested duplicates. `NumPeople` counts
/// distinct speakers behind those claims; a comment without a speaker counts
/// as its own speaker.
pub fn presentation_order<'a>(
    taxonomy: &'a Taxonomy,
    strategy: SortStrategy,
    comments: &[Comment],
) -> Vec<TopicView<'a>> {
    let speakers: HashMap<&str, &str> = comments
        .iter()
        .map(|c| (c.id.as_str(), c.speaker_key()))
        .collect();

    let mut topics: Vec<TopicView<'a>> = taxonomy
        .topics
        .iter()
        .map(|topic| {
            let mut topic_people: HashSet<&str> = HashSet::new();
            let mut topic_claims = 0;

            let mut subtopics: Vec<SubtopicView<'a>> = topic
                .subtopics
                .iter()
                .filter_map(|subtopic| {
                    let claims = all_claims(subtopic);
                    if claims.is_empty() {
                        return None;
                    }
                    let people: HashSet<&str> = claims
                        .iter()
                        .map(|claim| speaker_of(&speakers, *claim))
                        .collect();
                    topic_claims += claims.len();
                    let count = match strategy {
                        SortStrategy::NumClaims => claims.len(),
                        SortStrategy::NumPeople => people.len(),
                    };
                    topic_people.extend(people);
                    Some(SubtopicView { subtopic, count })
                })
                .collect();
            subtopics.sort_by_key(|view| Reverse(view.count));

            let count = match strategy {
                SortStrategy::NumClaims => topic_claims,
                SortStrategy::NumPeople => topic_people.len(),
            };
            TopicView {
                topic,
                subtopics,
                count,
            }
        })
        .filter(|view| !view.subtopics.is_empty())
        .collect();

    topics.sort_by_key(|view| Reverse(view.count));
    topics
}

fn speaker_of<'s>(speakers: &HashMap<&'s str, &'s str>, claim: &'s Claim) -> &'s str {
    speakers
        .get(claim.comment_id.as_str())
        .copied()
        .unwrap_or(claim.comment_id.as_str())
}

fn all_claims(subtopic: &Subtopic) -> Vec<&Claim> {
    let mut out = Vec::new();
    for claim in &subtopic.claims {
        claim.walk(&mut out);
    }
    out
}
