#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial linking engine.
//!
//! Builds an R-tree index over receptor coordinates and, for every source,
//! finds all receptors of one type within that type's search radius under
//! great-circle (haversine) distance, emitting one [`Link`] per pair with
//! the distance-decayed surviving load.
//!
//! The index query is a two-stage filter: a conservative degree-space
//! bounding box around the source (sized from the radius at the source's
//! latitude) prunes candidates via `locate_in_envelope_intersecting`, then
//! the exact haversine distance decides membership. At repository scale
//! (hundreds of thousands of sources against tens of thousands of
//! receptors) an exhaustive pairwise scan is tens of billions of distance
//! computations; the tree keeps each source's query proportional to its
//! local receptor density instead.

use geo::{Distance, Haversine, Point};
use rstar::{AABB, RTree, RTreeObject};
use wellrisk_models::{Link, Receptor, ReceptorType, SourceRecord};

/// Batch size used when the caller does not specify one. Sources are
/// processed in fixed-size chunks purely to bound peak memory; results
/// are identical for any batch size.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Meters per degree of latitude, used only to size the conservative
/// envelope prefilter. Exact distances always come from the haversine
/// formula.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Inflation applied to the prefilter envelope so that the degree-space
/// box never excludes a point that the exact haversine check would keep.
const ENVELOPE_MARGIN: f64 = 1.05;

/// A receptor position stored in the R-tree, pointing back into the
/// receptor slice the index was built from.
struct ReceptorEntry {
    /// Index into the original receptor slice.
    idx: usize,
    lon: f64,
    lat: f64,
}

impl RTreeObject for ReceptorEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

/// Pre-built spatial index over the receptors of one type.
///
/// Constructed once per receptor type and shared across every source
/// batch (and, during calibration, across grid points — geometry never
/// changes mid-grid).
pub struct ReceptorIndex {
    tree: RTree<ReceptorEntry>,
    receptor_type: ReceptorType,
}

impl ReceptorIndex {
    /// Builds the index over all receptors of `receptor_type` in
    /// `receptors`. Entries keep their position in the input slice so
    /// query results can be joined back to full receptor records.
    #[must_use]
    pub fn build(receptors: &[Receptor], receptor_type: ReceptorType) -> Self {
        let entries: Vec<ReceptorEntry> = receptors
            .iter()
            .enumerate()
            .filter(|(_, r)| r.receptor_type == receptor_type)
            .map(|(idx, r)| ReceptorEntry {
                idx,
                lon: r.lon,
                lat: r.lat,
            })
            .collect();

        log::debug!(
            "built {receptor_type} receptor index with {} entries",
            entries.len()
        );

        Self {
            tree: RTree::bulk_load(entries),
            receptor_type,
        }
    }

    /// The receptor type this index was built for.
    #[must_use]
    pub const fn receptor_type(&self) -> ReceptorType {
        self.receptor_type
    }

    /// Number of receptors in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// All receptors within `radius_m` meters (great-circle) of the query
    /// point, as `(slice index, distance in meters)` pairs. A search
    /// circle straddling the ±180° antimeridian is covered by a second
    /// envelope on the far side, so no candidate is pruned by the wrap.
    #[must_use]
    pub fn within_radius(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<(usize, f64)> {
        let query = Point::new(lon, lat);

        radius_envelopes(lat, lon, radius_m)
            .iter()
            .flat_map(|envelope| self.tree.locate_in_envelope_intersecting(envelope))
            .filter_map(|entry| {
                let distance = Haversine.distance(query, Point::new(entry.lon, entry.lat));
                (distance <= radius_m).then_some((entry.idx, distance))
            })
            .collect()
    }
}

/// Degree-space bounding boxes covering a `radius_m` circle at (`lat`,
/// `lon`). Longitude span widens with latitude (degrees shrink by
/// cos(lat)); the cosine is clamped so polar coordinates still produce a
/// finite box. A box crossing the ±180° antimeridian is split into two
/// disjoint boxes, one on each side; a span of 180° or more degenerates
/// to the full longitude range.
fn radius_envelopes(lat: f64, lon: f64, radius_m: f64) -> Vec<AABB<[f64; 2]>> {
    let lat_span = radius_m / METERS_PER_DEGREE * ENVELOPE_MARGIN;
    let cos_lat = lat.to_radians().cos().max(0.01);
    let lon_span = radius_m / (METERS_PER_DEGREE * cos_lat) * ENVELOPE_MARGIN;

    let (lat_min, lat_max) = (lat - lat_span, lat + lat_span);
    if lon_span >= 180.0 {
        return vec![AABB::from_corners([-180.0, lat_min], [180.0, lat_max])];
    }

    let (west, east) = (lon - lon_span, lon + lon_span);
    let mut envelopes = vec![AABB::from_corners(
        [west.max(-180.0), lat_min],
        [east.min(180.0), lat_max],
    )];
    if west < -180.0 {
        envelopes.push(AABB::from_corners([west + 360.0, lat_min], [180.0, lat_max]));
    }
    if east > 180.0 {
        envelopes.push(AABB::from_corners([-180.0, lat_min], [east - 360.0, lat_max]));
    }
    envelopes
}

/// Links every source against one receptor type.
///
/// Sources are processed in `batch_size` chunks; a source with no
/// in-radius receptor emits no rows. Surviving load is
/// `load × exp(−k·d)` — `decay_k` of 0 degenerates to uniform survival
/// within the radius with no special case. Sources whose load has not
/// been computed contribute a load of 0 (they still link; the aggregate
/// is unaffected).
#[must_use]
pub fn link_sources(
    sources: &[SourceRecord],
    receptors: &[Receptor],
    index: &ReceptorIndex,
    radius_m: f64,
    decay_k: f64,
    batch_size: usize,
) -> Vec<Link> {
    let batch_size = batch_size.max(1);
    let mut links = Vec::new();

    for batch in sources.chunks(batch_size) {
        for source in batch {
            let load = source.load.unwrap_or(0.0);

            for (idx, distance_m) in index.within_radius(source.lat, source.lon, radius_m) {
                let surviving_load = load * (-decay_k * distance_m).exp();
                links.push(Link {
                    source_id: source.id.clone(),
                    receptor_id: receptors[idx].id.clone(),
                    receptor_type: index.receptor_type(),
                    distance_m,
                    surviving_load,
                });
            }
        }
    }

    log::debug!(
        "linked {} sources to {} {} receptors within {radius_m} m: {} links",
        sources.len(),
        index.len(),
        index.receptor_type(),
        links.len()
    );

    links
}

#[cfg(test)]
mod tests {
    use wellrisk_models::SourceCategory;

    use super::*;

    /// One degree of longitude at the equator under the haversine mean
    /// earth radius, in meters.
    const DEG_AT_EQUATOR_M: f64 = 111_195.0;

    fn receptor(id: &str, receptor_type: ReceptorType, lat: f64, lon: f64) -> Receptor {
        Receptor {
            id: id.to_string(),
            receptor_type,
            lat,
            lon,
            flow: None,
            observed: None,
        }
    }

    fn source(id: &str, lat: f64, lon: f64, load: f64) -> SourceRecord {
        SourceRecord {
            id: id.to_string(),
            lat,
            lon,
            category: SourceCategory::UnlinedPit,
            population: 5.0,
            efficiency: None,
            load: Some(load),
        }
    }

    /// Receptor roughly `meters` east of the origin on the equator.
    fn receptor_east(id: &str, meters: f64) -> Receptor {
        receptor(
            id,
            ReceptorType::Private,
            0.0,
            meters / DEG_AT_EQUATOR_M,
        )
    }

    #[test]
    fn haversine_scale_sanity() {
        let receptors = vec![receptor("r1", ReceptorType::Private, 0.0, 1.0)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);
        let hits = index.within_radius(0.0, 0.0, 120_000.0);
        assert_eq!(hits.len(), 1);
        // One degree of longitude at the equator is ~111.2 km.
        assert!((hits[0].1 - 111_195.0).abs() < 100.0);
    }

    #[test]
    fn radius_excludes_distant_receptors() {
        let receptors = vec![receptor_east("near", 40.0), receptor_east("far", 80.0)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);
        let sources = vec![source("s1", 0.0, 0.0, 1e9)];

        let links = link_sources(&sources, &receptors, &index, 50.0, 0.0, DEFAULT_BATCH_SIZE);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].receptor_id, "near");
        for link in &links {
            assert!(link.distance_m <= 50.0);
        }
    }

    #[test]
    fn decay_is_monotonic_in_distance() {
        let receptors = vec![receptor_east("near", 10.0), receptor_east("far", 45.0)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);
        let sources = vec![source("s1", 0.0, 0.0, 1e9)];

        let links = link_sources(&sources, &receptors, &index, 50.0, 0.2, DEFAULT_BATCH_SIZE);
        assert_eq!(links.len(), 2);
        let near = links.iter().find(|l| l.receptor_id == "near").unwrap();
        let far = links.iter().find(|l| l.receptor_id == "far").unwrap();
        assert!(near.surviving_load > far.surviving_load);
        assert!(near.surviving_load <= 1e9);
    }

    #[test]
    fn zero_decay_survives_in_full() {
        let receptors = vec![receptor_east("r1", 45.0)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);
        let sources = vec![source("s1", 0.0, 0.0, 1e9)];

        let links = link_sources(&sources, &receptors, &index, 50.0, 0.0, DEFAULT_BATCH_SIZE);
        assert_eq!(links.len(), 1);
        assert!((links[0].surviving_load - 1e9).abs() < 1e-3);
    }

    #[test]
    fn surviving_load_matches_exponential() {
        let receptors = vec![receptor_east("r1", 30.0)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);
        let sources = vec![source("s1", 0.0, 0.0, 1e6)];

        let links = link_sources(&sources, &receptors, &index, 50.0, 0.1, DEFAULT_BATCH_SIZE);
        assert_eq!(links.len(), 1);
        let expected = 1e6 * (-0.1 * links[0].distance_m).exp();
        assert!((links[0].surviving_load - expected).abs() < 1e-9 * expected);
    }

    #[test]
    fn result_is_independent_of_batch_size() {
        let receptors: Vec<Receptor> = (0..8)
            .map(|i| receptor_east(&format!("r{i}"), f64::from(i) * 12.0))
            .collect();
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);
        let sources: Vec<SourceRecord> = (0..10)
            .map(|i| source(&format!("s{i}"), 0.0, f64::from(i) * 1e-4, 1e7))
            .collect();

        let sort = |mut links: Vec<Link>| {
            links.sort_by(|a, b| {
                (a.source_id.as_str(), a.receptor_id.as_str())
                    .cmp(&(b.source_id.as_str(), b.receptor_id.as_str()))
            });
            links
        };

        let reference = sort(link_sources(&sources, &receptors, &index, 60.0, 0.05, 1));
        for batch_size in [2, 3, 7, 10_000] {
            let links = sort(link_sources(
                &sources, &receptors, &index, 60.0, 0.05, batch_size,
            ));
            assert_eq!(links, reference, "batch size {batch_size}");
        }
    }

    #[test]
    fn index_only_sees_its_own_type() {
        let receptors = vec![
            receptor("private", ReceptorType::Private, 0.0, 0.0),
            receptor("government", ReceptorType::Government, 0.0, 0.0),
        ];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Government);
        assert_eq!(index.len(), 1);

        let hits = index.within_radius(0.0, 0.0, 10.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(receptors[hits[0].0].id, "government");
    }

    #[test]
    fn isolated_source_emits_no_rows() {
        let receptors = vec![receptor_east("r1", 500.0)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);
        let sources = vec![source("s1", 0.0, 0.0, 1e9)];

        let links = link_sources(&sources, &receptors, &index, 50.0, 0.1, DEFAULT_BATCH_SIZE);
        assert!(links.is_empty());
    }

    #[test]
    fn envelope_widens_with_latitude() {
        // At 60°N a degree of longitude is half as long, so a receptor
        // 50 m east sits at twice the degree offset it would on the
        // equator. The envelope prefilter must still find it.
        let lat: f64 = 60.0;
        let lon_offset = 50.0 / (DEG_AT_EQUATOR_M * lat.to_radians().cos());
        let receptors = vec![receptor("r1", ReceptorType::Private, lat, lon_offset)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);

        let hits = index.within_radius(lat, 0.0, 60.0);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 50.0).abs() < 1.0);
    }

    #[test]
    fn envelope_wraps_at_the_antimeridian() {
        // Query just west of +180°, receptor just east of −180°: 40 m
        // apart on the ground but at opposite ends of the longitude
        // axis. The prefilter must query both sides of the wrap.
        let query_lon = 180.0 - 20.0 / DEG_AT_EQUATOR_M;
        let receptor_lon = -180.0 + 20.0 / DEG_AT_EQUATOR_M;
        let receptors = vec![receptor("r1", ReceptorType::Private, 0.0, receptor_lon)];
        let index = ReceptorIndex::build(&receptors, ReceptorType::Private);

        let hits = index.within_radius(0.0, query_lon, 50.0);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 40.0).abs() < 1.0);
    }
}
