use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::itinerary::{ActivityEntry, DayPlan, EditOp, EditRecord, Itinerary};
use crate::ports::itineraries::ItineraryRepository;
use crate::util::{format_ms_date, now_ms};
use crate::DomainResult;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomizeAction {
    pub op: EditOp,
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct CustomizeService {
    itineraries: Arc<dyn ItineraryRepository>,
}

impl CustomizeService {
    pub fn new(itineraries: Arc<dyn ItineraryRepository>) -> Self {
        Self { itineraries }
    }

    /// Apply a batch of edits inside one store transaction. All actions
    /// commit or none do: the mutation runs against local state and any
    /// failing action aborts the whole call before commit. Returns the edit
    /// records appended by this call.
    pub async fn customize(
        &self,
        actor: ActorIdentity,
        itinerary_id: &str,
        actions: Vec<CustomizeAction>,
    ) -> DomainResult<Vec<EditRecord>> {
        if actions.is_empty() {
            return Err(DomainError::Validation(
                "at least one action is required".into(),
            ));
        }
        let user_id = actor.user_id;
        let ts_ms = now_ms();

        let (_, delta) = self
            .itineraries
            .update_in_transaction(
                itinerary_id,
                Box::new(move |mut itinerary: Itinerary| {
                    if itinerary.user_id != user_id {
                        return Err(DomainError::Forbidden);
                    }
                    let records = apply_actions(&mut itinerary, &actions, ts_ms)?;
                    itinerary.edits.extend(records.iter().cloned());
                    itinerary.updated_at_ms = ts_ms;
                    Ok((itinerary, records))
                }),
            )
            .await?;
        Ok(delta)
    }
}

/// Pure batch mutation of the itinerary document. Mutates summary and
/// booking options in place and returns one edit record per action; an error
/// from any action leaves the caller to discard the whole mutated state.
pub fn apply_actions(
    itinerary: &mut Itinerary,
    actions: &[CustomizeAction],
    ts_ms: i64,
) -> DomainResult<Vec<EditRecord>> {
    let mut records = Vec::with_capacity(actions.len());
    for action in actions {
        match action.op {
            EditOp::Swap => apply_swap(itinerary, action)?,
            EditOp::Add => apply_add(itinerary, action, ts_ms)?,
            EditOp::Remove => apply_remove(itinerary, action)?,
        }
        records.push(EditRecord {
            op: action.op,
            item_type: action.item_type.clone(),
            item_id: action.item_id.clone(),
            alternative_id: action.alternative_id.clone(),
            reason: action.reason.clone(),
            ts_ms,
        });
    }
    Ok(records)
}

fn apply_swap(itinerary: &mut Itinerary, action: &CustomizeAction) -> DomainResult<()> {
    let item_id = required(action.item_id.as_deref(), "swap requires item_id")?;
    let alternative_id = required(
        action.alternative_id.as_deref(),
        "swap requires alternative_id",
    )?;

    // (a) Replace inside the offer lists: the target may sit in any list and
    // the alternative may come from any list.
    let target = itinerary
        .booking_options
        .iter()
        .find_map(|(key, offers)| {
            offers
                .iter()
                .position(|offer| offer.matches(item_id))
                .map(|index| (key.clone(), index))
        });
    if let Some((key, index)) = target {
        let alternative = itinerary.find_offer(alternative_id).cloned();
        if let (Some(alternative), Some(offers)) =
            (alternative, itinerary.booking_options.get_mut(&key))
        {
            offers[index] = alternative;
            return Ok(());
        }
    }

    // (b) Replace a planned activity with an alternative offer of the same
    // item type.
    let position = itinerary.summary.days.iter().enumerate().find_map(
        |(day_index, day)| {
            day.activities
                .iter()
                .position(|activity| activity.id == item_id)
                .map(|activity_index| (day_index, activity_index))
        },
    );
    if let Some((day_index, activity_index)) = position {
        let alternative = itinerary
            .offers_for(&action.item_type)
            .iter()
            .find(|offer| offer.matches(alternative_id))
            .cloned();
        if let Some(offer) = alternative {
            itinerary.summary.days[day_index].activities[activity_index] =
                ActivityEntry::from_offer(&offer, &action.item_type);
            return Ok(());
        }
    }

    Err(DomainError::Validation(
        "alternative not available in booking options".into(),
    ))
}

fn apply_add(itinerary: &mut Itinerary, action: &CustomizeAction, ts_ms: i64) -> DomainResult<()> {
    let alternative_id = required(
        action.alternative_id.as_deref(),
        "add requires alternative_id",
    )?;
    // Permissive by design: no offer-list validation for additions.
    let stub = ActivityEntry::stub(alternative_id, action.item_type.clone());
    match itinerary.summary.days.first_mut() {
        Some(day) => day.activities.push(stub),
        None => itinerary.summary.days.push(DayPlan {
            date: format_ms_date(ts_ms),
            activities: vec![stub],
        }),
    }
    Ok(())
}

fn apply_remove(itinerary: &mut Itinerary, action: &CustomizeAction) -> DomainResult<()> {
    let item_id = required(action.item_id.as_deref(), "remove requires item_id")?;
    // Best effort: a missing target is not an error.
    for day in &mut itinerary.summary.days {
        day.activities.retain(|activity| activity.id != item_id);
    }
    for offers in itinerary.booking_options.values_mut() {
        offers.retain(|offer| !offer.matches(item_id));
    }
    Ok(())
}

fn required<'a>(value: Option<&'a str>, message: &str) -> DomainResult<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| DomainError::Validation(message.to_string()))
}
