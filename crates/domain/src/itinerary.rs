use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::itineraries::ItineraryRepository;
use crate::util::{now_ms, prefixed_id};
use crate::DomainResult;

pub const MAX_TRIP_DURATION_DAYS: i64 = 60;
pub const MAX_TRAVELERS: u32 = 20;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItineraryStatus {
    Draft,
    Active,
    Booked,
    Cancelled,
}

impl ItineraryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Booked => "booked",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Booked | Self::Cancelled)
    }

    /// Forward-only lifecycle: draft -> active -> booked, with cancelled
    /// reachable from any non-terminal state. Forward jumps are allowed.
    pub fn can_transition_to(&self, next: ItineraryStatus) -> bool {
        match (self, next) {
            (Self::Draft, Self::Active)
            | (Self::Draft, Self::Booked)
            | (Self::Active, Self::Booked) => true,
            (current, Self::Cancelled) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for ItineraryStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "booked" => Ok(Self::Booked),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err("unknown itinerary status"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// One entry in a day plan. Planner-enriched entries carry names, prices and
/// coordinates; entries added through customization may be bare stubs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

impl ActivityEntry {
    pub fn stub(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: Some(kind.into()),
            name: None,
            lat: None,
            lng: None,
            amount: None,
        }
    }

    pub fn from_offer(offer: &BookingOffer, kind: &str) -> Self {
        Self {
            id: offer.id.clone(),
            kind: Some(kind.to_string()),
            name: offer.name.clone(),
            lat: None,
            lng: None,
            amount: Some(offer.amount),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DayPlan {
    pub date: String,
    pub activities: Vec<ActivityEntry>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ItinerarySummary {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GeoPoint>,
    #[serde(default)]
    pub days: Vec<DayPlan>,
}

/// Priced candidate offer, keyed into `booking_options` under the plural of
/// its item type (`hotels`, `flights`, `activities`). Amounts are minor
/// currency units.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BookingOffer {
    pub id: String,
    pub quote_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub amount: i64,
    pub currency: String,
}

impl BookingOffer {
    pub fn matches(&self, needle: &str) -> bool {
        self.id == needle || self.quote_id == needle
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    Swap,
    Add,
    Remove,
}

impl EditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

impl FromStr for EditOp {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "swap" => Ok(Self::Swap),
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            _ => Err("unknown edit op"),
        }
    }
}

/// Append-only audit entry; never mutated or deleted once written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EditRecord {
    pub op: EditOp,
    pub item_type: String,
    pub item_id: Option<String>,
    pub alternative_id: Option<String>,
    pub reason: Option<String>,
    pub ts_ms: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TripInput {
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_minor: Option<i64>,
    #[serde(default)]
    pub themes: Vec<String>,
    pub travelers: u32,
}

/// Aggregate root. Mutated only through the customization engine (summary,
/// booking options, edit log) or the hold manager (reservation references).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Itinerary {
    pub itinerary_id: String,
    pub user_id: String,
    pub status: ItineraryStatus,
    pub input: TripInput,
    pub summary: ItinerarySummary,
    #[serde(default)]
    pub booking_options: BTreeMap<String, Vec<BookingOffer>>,
    #[serde(default)]
    pub reservations: Vec<String>,
    #[serde(default)]
    pub edits: Vec<EditRecord>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Itinerary {
    pub fn assert_owned_by(&self, actor: &ActorIdentity) -> DomainResult<()> {
        if self.user_id == actor.user_id {
            Ok(())
        } else {
            Err(DomainError::Forbidden)
        }
    }

    /// Search every offer list for an entry whose id or quote id equals
    /// `needle`.
    pub fn find_offer(&self, needle: &str) -> Option<&BookingOffer> {
        self.booking_options
            .values()
            .flat_map(|offers| offers.iter())
            .find(|offer| offer.matches(needle))
    }

    /// Offers for an item type, looked up under its plural key.
    pub fn offers_for(&self, item_type: &str) -> &[BookingOffer] {
        self.booking_options
            .get(&offers_key(item_type))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn advance(&mut self, next: ItineraryStatus) -> DomainResult<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidState(format!(
                "itinerary cannot move from {} to {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.updated_at_ms = now_ms();
        Ok(())
    }
}

pub fn offers_key(item_type: &str) -> String {
    format!("{item_type}s")
}

#[derive(Clone, Debug, Default)]
pub struct TripCreate {
    pub destination: String,
    pub origin: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration_days: Option<i64>,
    pub budget_minor: Option<i64>,
    pub themes: Vec<String>,
    pub travelers: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct AlternativesQuery {
    pub item_type: String,
    pub current_id: String,
    pub max_price: Option<i64>,
}

#[derive(Clone)]
pub struct ItineraryService {
    repository: Arc<dyn ItineraryRepository>,
}

impl ItineraryService {
    pub fn new(repository: Arc<dyn ItineraryRepository>) -> Self {
        Self { repository }
    }

    pub async fn create(&self, actor: ActorIdentity, input: TripCreate) -> DomainResult<Itinerary> {
        let input = validate_trip_create(input)?;
        let now = now_ms();
        let duration_days = input.duration_days.or_else(|| {
            derive_duration_days(input.start_date.as_deref(), input.end_date.as_deref())
        });

        let itinerary = Itinerary {
            itinerary_id: prefixed_id("it"),
            user_id: actor.user_id,
            status: ItineraryStatus::Draft,
            summary: ItinerarySummary {
                title: format!("Trip to {}", input.destination),
                center: None,
                days: Vec::new(),
            },
            input: TripInput {
                destination: input.destination,
                origin: input.origin,
                start_date: input.start_date,
                end_date: input.end_date,
                duration_days,
                budget_minor: input.budget_minor,
                themes: input.themes,
                travelers: input.travelers.unwrap_or(1),
            },
            booking_options: BTreeMap::new(),
            reservations: Vec::new(),
            edits: Vec::new(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.repository.create(&itinerary).await
    }

    pub async fn get(&self, actor: &ActorIdentity, itinerary_id: &str) -> DomainResult<Itinerary> {
        let itinerary = self
            .repository
            .get(itinerary_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        itinerary.assert_owned_by(actor)?;
        Ok(itinerary)
    }

    pub async fn list(
        &self,
        actor: &ActorIdentity,
        status: Option<ItineraryStatus>,
    ) -> DomainResult<Vec<Itinerary>> {
        self.repository.list_by_user(&actor.user_id, status).await
    }

    pub async fn alternatives(
        &self,
        actor: &ActorIdentity,
        itinerary_id: &str,
        query: AlternativesQuery,
    ) -> DomainResult<Vec<BookingOffer>> {
        if query.item_type.trim().is_empty() {
            return Err(DomainError::Validation("item_type is required".into()));
        }
        let itinerary = self.get(actor, itinerary_id).await?;
        let candidates = itinerary
            .offers_for(query.item_type.trim())
            .iter()
            .filter(|offer| match query.max_price {
                Some(max_price) => offer.amount <= max_price,
                None => true,
            })
            .cloned()
            .collect();
        Ok(candidates)
    }
}

fn validate_trip_create(input: TripCreate) -> Result<TripCreate, DomainError> {
    let destination = input.destination.trim().to_string();
    if destination.is_empty() {
        return Err(DomainError::Validation("destination is required".into()));
    }
    if let Some(duration) = input.duration_days {
        if !(1..=MAX_TRIP_DURATION_DAYS).contains(&duration) {
            return Err(DomainError::Validation(format!(
                "duration_days must be between 1 and {MAX_TRIP_DURATION_DAYS}"
            )));
        }
    }
    if let Some(budget) = input.budget_minor {
        if budget < 0 {
            return Err(DomainError::Validation("budget cannot be negative".into()));
        }
    }
    if let Some(travelers) = input.travelers {
        if !(1..=MAX_TRAVELERS).contains(&travelers) {
            return Err(DomainError::Validation(format!(
                "travelers must be between 1 and {MAX_TRAVELERS}"
            )));
        }
    }
    Ok(TripCreate {
        destination,
        ..input
    })
}

fn derive_duration_days(start_date: Option<&str>, end_date: Option<&str>) -> Option<i64> {
    let format = format_description!("[year]-[month]-[day]");
    let start = Date::parse(start_date?, &format).ok()?;
    let end = Date::parse(end_date?, &format).ok()?;
    if end < start {
        return None;
    }
    Some((end - start).whole_days() + 1)
}
