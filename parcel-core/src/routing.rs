//! Postal-code routing: which partner picks up or delivers at an address.
//!
//! [`RangeIndex`] answers containment over the canonical [`PostalKey`] form;
//! [`RoutingResolver`] loads a country's ranges, asks the index for the best
//! match and writes partner references into a shipment.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Partner, PostalCodeRange, RangeKind, Shipment};
use crate::postal::{CountryCode, PostalKey};
use crate::repository::{PartnerRepository, RangeRepository};
use crate::{CoreError, CoreResult};

#[derive(Debug, Clone)]
struct IndexedRange {
    id: i64,
    partner_id: Uuid,
    from: PostalKey,
    to: PostalKey,
    priority: i32,
}

impl IndexedRange {
    fn contains(&self, code: &PostalKey) -> bool {
        self.from <= *code && *code <= self.to
    }
}

/// The range that won a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeMatch {
    pub range_id: i64,
    pub partner_id: Uuid,
    pub priority: i32,
}

impl From<&IndexedRange> for RangeMatch {
    fn from(range: &IndexedRange) -> Self {
        Self {
            range_id: range.id,
            partner_id: range.partner_id,
            priority: range.priority,
        }
    }
}

/// Coverage ranges grouped by (country, kind), each group ordered by
/// `(priority, id)` so the first containing range is the winner.
///
/// Ties on priority go to the lowest range id, which keeps results stable
/// across runs and replicas.
#[derive(Debug, Default)]
pub struct RangeIndex {
    groups: HashMap<(CountryCode, RangeKind), Vec<IndexedRange>>,
}

impl RangeIndex {
    /// Rows that cannot be normalized, or whose bounds are reversed, are
    /// skipped with a warning and never match.
    pub fn build(ranges: impl IntoIterator<Item = PostalCodeRange>) -> Self {
        let mut groups: HashMap<(CountryCode, RangeKind), Vec<IndexedRange>> = HashMap::new();

        for range in ranges {
            let parsed = CountryCode::parse(&range.country).and_then(|country| {
                Ok((country, PostalKey::parse(&range.code_from)?, PostalKey::parse(&range.code_to)?))
            });

            let (country, from, to) = match parsed {
                Ok(bounds) => bounds,
                Err(e) => {
                    tracing::warn!(range_id = range.id, error = %e, "Skipping malformed postal code range");
                    continue;
                }
            };

            if from > to {
                tracing::warn!(
                    range_id = range.id,
                    code_from = %from,
                    code_to = %to,
                    "Skipping postal code range with reversed bounds"
                );
                continue;
            }

            groups.entry((country, range.kind)).or_default().push(IndexedRange {
                id: range.id,
                partner_id: range.partner_id,
                from,
                to,
                priority: range.priority,
            });
        }

        for group in groups.values_mut() {
            group.sort_by_key(|r| (r.priority, r.id));
        }

        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All containing ranges in precedence order.
    pub fn matches(&self, country: CountryCode, code: &PostalKey, kind: RangeKind) -> Vec<RangeMatch> {
        self.groups
            .get(&(country, kind))
            .map(|group| {
                group
                    .iter()
                    .filter(|r| r.contains(code))
                    .map(RangeMatch::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn best_match(&self, country: CountryCode, code: &PostalKey, kind: RangeKind) -> Option<RangeMatch> {
        self.groups
            .get(&(country, kind))
            .and_then(|group| group.iter().find(|r| r.contains(code)))
            .map(RangeMatch::from)
    }
}

/// A caller-supplied partner, by id or by three-digit station number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerRef {
    Id(Uuid),
    Station(i32),
}

/// Manual routing overrides. Applied after automatic resolution and always
/// take precedence over it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerOverrides {
    pub pickup: Option<PartnerRef>,
    pub delivery: Option<PartnerRef>,
}

impl PartnerOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pickup.is_none() && self.delivery.is_none()
    }
}

/// Stateless apart from its repositories; safe to share across requests.
#[derive(Clone)]
pub struct RoutingResolver {
    ranges: Arc<dyn RangeRepository>,
    partners: Arc<dyn PartnerRepository>,
}

impl RoutingResolver {
    pub fn new(ranges: Arc<dyn RangeRepository>, partners: Arc<dyn PartnerRepository>) -> Self {
        Self { ranges, partners }
    }

    /// `Ok(None)` means no range covers the address. Malformed country or
    /// postal code input is rejected before any lookup.
    pub async fn resolve_partner(&self, country: &str, code: &str, kind: RangeKind) -> CoreResult<Option<Uuid>> {
        let country = CountryCode::parse(country)?;
        let code = PostalKey::parse(code)?;

        let index = RangeIndex::build(self.ranges.ranges_for_country(&country).await?);
        let found = index.best_match(country, &code, kind);

        match found {
            Some(m) => tracing::debug!(
                %country,
                code = %code,
                kind = %kind,
                range_id = m.range_id,
                partner_id = %m.partner_id,
                "Resolved partner"
            ),
            None => tracing::debug!(%country, code = %code, kind = %kind, "No range covers address"),
        }

        Ok(found.map(|m| m.partner_id))
    }

    pub async fn assign_pickup(&self, shipment: &mut Shipment) -> CoreResult<()> {
        shipment.pickup_partner_id = self
            .resolve_partner(&shipment.sender.country, &shipment.sender.postal_code, RangeKind::Pickup)
            .await?;
        Ok(())
    }

    pub async fn assign_delivery(&self, shipment: &mut Shipment) -> CoreResult<()> {
        shipment.delivery_partner_id = self
            .resolve_partner(&shipment.recipient.country, &shipment.recipient.postal_code, RangeKind::Delivery)
            .await?;
        Ok(())
    }

    /// Booking partner is set unconditionally; pickup and delivery come from
    /// the sender and recipient addresses and may stay unassigned.
    pub async fn assign_partners(&self, shipment: &mut Shipment, booking_partner: Option<Uuid>) -> CoreResult<()> {
        shipment.booking_partner_id = booking_partner;
        self.assign_pickup(shipment).await?;
        self.assign_delivery(shipment).await?;
        Ok(())
    }

    /// Must run after automatic resolution. An override naming an unknown
    /// partner is a validation error, never silently dropped.
    pub async fn apply_overrides(&self, shipment: &mut Shipment, overrides: &PartnerOverrides) -> CoreResult<()> {
        if let Some(pickup) = overrides.pickup {
            let partner = self.lookup(pickup, "pickup").await?;
            shipment.pickup_partner_id = Some(partner.id);
        }
        if let Some(delivery) = overrides.delivery {
            let partner = self.lookup(delivery, "delivery").await?;
            shipment.delivery_partner_id = Some(partner.id);
        }
        Ok(())
    }

    async fn lookup(&self, reference: PartnerRef, role: &str) -> CoreResult<Partner> {
        let found = match reference {
            PartnerRef::Id(id) => self.partners.get_partner(id).await?,
            PartnerRef::Station(station) => {
                Partner::validate_station_number(station)?;
                self.partners.find_by_station(station).await?
            }
        };

        found.ok_or_else(|| {
            CoreError::ValidationError(format!("{} partner override {:?} does not exist", role, reference))
        })
    }
}
