//! Entry-zone occupancy filter
//!
//! Reduces a frame's tracker output to the ids whose centroid lies strictly
//! inside the entry zone. The result is kept sorted and de-duplicated so
//! callers get a stable iteration order and cheap access to the lowest id.

use crate::domain::types::{Detection, TrackId, TrackedEntity, ZoneRegion};
use crate::infra::config::{Config, ZoneUnits};
use smallvec::SmallVec;
use tracing::info;

/// Sorted, de-duplicated set of track ids inside the zone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupantSet(SmallVec<[TrackId; 4]>);

impl OccupantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I: IntoIterator<Item = TrackId>>(ids: I) -> Self {
        let mut ids: SmallVec<[TrackId; 4]> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn contains(&self, id: TrackId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Lowest id, used as the deterministic primary tie-break
    #[inline]
    pub fn lowest(&self) -> Option<TrackId> {
        self.0.first().copied()
    }

    /// Ids other than `id`
    pub fn others(&self, id: TrackId) -> impl Iterator<Item = TrackId> + '_ {
        self.0.iter().copied().filter(move |&other| other != id)
    }

    pub fn iter(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[TrackId] {
        &self.0
    }
}

/// Ids of the entities whose centroid is strictly inside `zone`
pub fn occupants_in(entities: &[TrackedEntity], zone: &ZoneRegion) -> OccupantSet {
    OccupantSet::from_ids(entities.iter().filter(|e| zone.contains(e.centroid)).map(|e| e.id))
}

/// Zone filter bound to the configured region
///
/// Relative regions are resolved to pixels once, against the first frame
/// seen, and stay fixed for the life of the filter.
pub struct ZoneFilter {
    configured: ZoneRegion,
    units: ZoneUnits,
    resolved: Option<ZoneRegion>,
}

impl ZoneFilter {
    pub fn new(configured: ZoneRegion, units: ZoneUnits) -> Self {
        let resolved = match units {
            ZoneUnits::Pixels => Some(configured),
            ZoneUnits::Relative => None,
        };
        Self { configured, units, resolved }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(*config.zone(), config.zone_units())
    }

    /// Pixel-space region, resolving it on first use
    pub fn region(&mut self, width: u32, height: u32) -> ZoneRegion {
        if let Some(region) = self.resolved {
            return region;
        }
        let region = ZoneRegion::from_relative(&self.configured, width, height);
        info!(
            width = %width,
            height = %height,
            x1 = %region.x1,
            y1 = %region.y1,
            x2 = %region.x2,
            y2 = %region.y2,
            "zone_resolved"
        );
        self.resolved = Some(region);
        region
    }

    /// Resolved region, if any frame has been seen yet
    pub fn resolved(&self) -> Option<ZoneRegion> {
        self.resolved
    }

    pub fn units(&self) -> ZoneUnits {
        self.units
    }

    /// Filter one frame's detections down to the ids inside the zone
    pub fn occupants(&mut self, width: u32, height: u32, detections: &[Detection]) -> OccupantSet {
        let region = self.region(width, height);
        let entities: SmallVec<[TrackedEntity; 8]> =
            detections.iter().map(TrackedEntity::from).collect();
        occupants_in(&entities, &region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BoundingBox, Point};

    fn entity(id: i64, x: f64, y: f64) -> TrackedEntity {
        TrackedEntity { id: TrackId(id), centroid: Point::new(x, y) }
    }

    fn detection(id: i64, x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
        Detection { track_id: TrackId(id), bbox: BoundingBox::new(x1, y1, x2, y2) }
    }

    #[test]
    fn test_filters_by_strict_interior() {
        let zone = ZoneRegion::new(100.0, 0.0, 300.0, 200.0);
        let entities = vec![
            entity(1, 150.0, 100.0), // inside
            entity(2, 100.0, 100.0), // on left edge
            entity(3, 300.0, 50.0),  // on right edge
            entity(4, 200.0, 0.0),   // on top edge
            entity(5, 50.0, 100.0),  // outside
            entity(6, 299.9, 199.9), // inside corner
        ];

        let occupants = occupants_in(&entities, &zone);
        assert_eq!(occupants.as_slice(), &[TrackId(1), TrackId(6)]);
    }

    #[test]
    fn test_empty_input() {
        let zone = ZoneRegion::new(0.0, 0.0, 10.0, 10.0);
        assert!(occupants_in(&[], &zone).is_empty());
    }

    #[test]
    fn test_sorted_and_deduplicated() {
        let set = OccupantSet::from_ids([TrackId(9), TrackId(2), TrackId(9), TrackId(5)]);
        assert_eq!(set.as_slice(), &[TrackId(2), TrackId(5), TrackId(9)]);
        assert_eq!(set.lowest(), Some(TrackId(2)));
        assert!(set.contains(TrackId(5)));
        assert!(!set.contains(TrackId(3)));
        assert_eq!(set.others(TrackId(5)).collect::<Vec<_>>(), vec![TrackId(2), TrackId(9)]);
    }

    #[test]
    fn test_relative_zone_resolved_once() {
        let mut filter = ZoneFilter::new(ZoneRegion::new(0.25, 0.0, 0.75, 1.0), ZoneUnits::Relative);
        assert!(filter.resolved().is_none());

        let region = filter.region(640, 480);
        assert_eq!(region, ZoneRegion::new(160.0, 0.0, 480.0, 480.0));

        // A later frame with a different size does not move the zone
        assert_eq!(filter.region(1280, 720), region);
    }

    #[test]
    fn test_pixel_zone_used_as_is() {
        let zone = ZoneRegion::new(10.0, 10.0, 20.0, 20.0);
        let mut filter = ZoneFilter::new(zone, ZoneUnits::Pixels);
        assert_eq!(filter.resolved(), Some(zone));
        assert_eq!(filter.region(640, 480), zone);
    }

    #[test]
    fn test_occupants_from_detections_use_bbox_centre() {
        let mut filter = ZoneFilter::new(ZoneRegion::new(0.25, 0.0, 0.75, 1.0), ZoneUnits::Relative);
        let detections = vec![
            // centre (320, 240): inside the middle half
            detection(7, 280.0, 100.0, 360.0, 380.0),
            // centre (60, 240): left of the zone
            detection(3, 20.0, 100.0, 100.0, 380.0),
            // bbox straddles the edge but centre (200, 240) is inside
            detection(4, 100.0, 100.0, 300.0, 380.0),
        ];

        let occupants = filter.occupants(640, 480, &detections);
        assert_eq!(occupants.as_slice(), &[TrackId(4), TrackId(7)]);
    }
}
