//! Reduces a window query to the postcode units it touches.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use postcode_polygons_spatial::PointIndex;
use postcode_polygons_spatial_models::{BoundingBox, district_of, normalize_postcode};

use crate::Tier;

/// Units covered by one polygon query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSelection {
    /// Districts whose polygon files must be read. Populated for both tiers,
    /// since unit files are partitioned by district.
    pub districts: BTreeSet<String>,
    /// Feature ids to keep: full postcodes for [`Tier::Fine`], districts
    /// for [`Tier::Coarse`].
    pub requested: BTreeSet<String>,
    pub tier: Tier,
}

impl UnitSelection {
    /// Returns `true` if the window contained no postcodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }
}

/// Collects the districts and requested ids for every postcode in `bbox`.
#[must_use]
pub fn resolve_units(index: &dyn PointIndex, bbox: &BoundingBox, tier: Tier) -> UnitSelection {
    let mut districts = BTreeSet::new();
    let mut requested = BTreeSet::new();

    index.visit(bbox, &mut |point| {
        let postcode = normalize_postcode(&point.postcode);
        let district = district_of(&postcode).to_string();

        match tier {
            Tier::Coarse => {
                requested.insert(district.clone());
            }
            Tier::Fine => {
                requested.insert(postcode);
            }
        }
        districts.insert(district);

        ControlFlow::Continue(())
    });

    UnitSelection {
        districts,
        requested,
        tier,
    }
}
