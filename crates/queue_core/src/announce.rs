use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use shared::domain::{CounterId, Ticket};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const DIGIT_WORDS: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

const NUMBER_WORDS: [&str; 21] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen", "twenty",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Announcement {
    pub display_code: String,
    pub counter: CounterId,
    pub text: String,
}

impl Announcement {
    pub fn for_ticket(ticket: &Ticket, counter: CounterId) -> Self {
        let text = format!(
            "Ticket {}, please proceed to counter {}",
            spell_code(&ticket.display_code),
            counter_words(counter)
        );
        Self {
            display_code: ticket.display_code.clone(),
            counter,
            text,
        }
    }
}

/// `"A007"` reads as `"A, zero, zero, seven"`.
pub fn spell_code(code: &str) -> String {
    code.chars()
        .map(|c| match c.to_digit(10) {
            Some(digit) => DIGIT_WORDS
                .get(digit as usize)
                .map_or_else(|| c.to_string(), |word| (*word).to_string()),
            None => c.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn counter_words(counter: CounterId) -> String {
    NUMBER_WORDS
        .get(usize::from(counter.number()))
        .map_or_else(|| counter.to_string(), |word| (*word).to_string())
}

/// Playback of a call announcement (speech, chime, signage).
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, announcement: &Announcement) -> anyhow::Result<()>;
}

/// Writes announcements to the log instead of playing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnnouncer;

#[async_trait]
impl Announcer for TracingAnnouncer {
    async fn announce(&self, announcement: &Announcement) -> anyhow::Result<()> {
        info!(
            ticket = %announcement.display_code,
            counter = %announcement.counter,
            text = %announcement.text,
            "announcement"
        );
        Ok(())
    }
}

/// Plays `announcement` in the background. Failures are logged only; queue
/// state is never rolled back because an output failed. Must be called
/// within a Tokio runtime.
pub fn announce_detached(
    announcer: Arc<dyn Announcer>,
    announcement: Announcement,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(error) = announcer.announce(&announcement).await {
            warn!(
                ticket = %announcement.display_code,
                counter = %announcement.counter,
                %error,
                "announcement failed"
            );
        }
    })
}

#[cfg(test)]
#[path = "tests/announce_tests.rs"]
mod tests;
