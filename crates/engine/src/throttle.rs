//! Delivery throttle — at most one suggestion in front of the user.
//!
//! State machine per suggestion:
//! `New → Shown → { Resolved (linked) | Ignored | New (cool-down expired
//! without action, capped re-surfaces) }`. While any shown suggestion is
//! younger than the cool-down, nothing new is emitted, which keeps a bulk
//! bank sync from turning into an interruption storm.

use chrono::{DateTime, Duration, Utc};
use lettra_core::{Suggestion, SuggestionState};

use crate::config::DeliveryConfig;
use crate::registry::SuggestionRegistry;

/// Emit the next eligible suggestion, transitioning it to `Shown`.
///
/// `now` is passed in rather than read from the clock so cool-down
/// behavior is testable.
pub fn next_suggestion(
    registry: &mut SuggestionRegistry,
    now: DateTime<Utc>,
    config: &DeliveryConfig,
) -> Option<Suggestion> {
    let cooldown = Duration::seconds(config.cooldown_secs);
    // First surfacing counts as 1, so the cap allows max_resurfaces extra.
    let surface_cap = config.max_resurfaces + 1;

    // Re-surface pass: shown suggestions whose cool-down expired without
    // user action return to New, up to the cap. Past the cap they stay
    // parked and stop blocking delivery.
    for suggestion in registry.entries_mut().values_mut() {
        if suggestion.state != SuggestionState::Shown {
            continue;
        }
        let expired = suggestion
            .shown_at
            .map_or(true, |shown| now - shown >= cooldown);
        if expired && suggestion.times_surfaced < surface_cap {
            suggestion.state = SuggestionState::New;
        }
    }

    // While a presentation is outstanding, emit nothing.
    let blocking = registry.entries_mut().values().any(|s| {
        s.state == SuggestionState::Shown
            && s.shown_at.map_or(false, |shown| now - shown < cooldown)
    });
    if blocking {
        return None;
    }

    // Oldest unresolved payment surfaces first; transaction id breaks ties.
    let next_id = registry
        .entries_mut()
        .values()
        .filter(|s| s.state == SuggestionState::New)
        .min_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then(a.transaction_id.cmp(&b.transaction_id))
        })
        .map(|s| s.transaction_id.clone())?;

    let suggestion = registry.entries_mut().get_mut(&next_id)?;
    suggestion.state = SuggestionState::Shown;
    suggestion.shown_at = Some(now);
    suggestion.times_surfaced += 1;
    Some(suggestion.clone())
}
