use crate::config::ParameterSet;
use crate::io::backend::{CatalogQuery, SceneCatalog};
use crate::types::{SarError, SarResult, Scene, SceneCollection};

/// Selects the scenes a run operates on
pub struct CollectionFilter;

impl CollectionFilter {
    /// Catalog query equivalent to the parameter set
    pub fn query(params: &ParameterSet) -> CatalogQuery {
        CatalogQuery {
            date_range: params.date_range(),
            required_bands: params.polarization().required_bands(),
            orbit: params.orbit(),
            region: params.region(),
        }
    }

    /// Query the catalog and return the matching scenes in acquisition order.
    ///
    /// The catalog's answer is filtered again locally, so a catalog that
    /// over-reports never widens the selection.
    pub fn select(params: &ParameterSet, catalog: &dyn SceneCatalog) -> SarResult<SceneCollection> {
        let query = Self::query(params);
        log::info!(
            "Querying scenes {} to {} ({:?}, {:?})",
            query.date_range.start,
            query.date_range.end,
            params.polarization(),
            query.orbit
        );

        let reported = catalog.query_scenes(&query)?;
        let reported_count = reported.len();
        let mut scenes: Vec<Scene> = reported.into_iter().filter(|s| query.matches(s)).collect();

        if scenes.len() != reported_count {
            log::warn!(
                "Catalog returned {} scenes outside the query, discarded",
                reported_count - scenes.len()
            );
        }

        if scenes.windows(2).any(|w| w[0].acquired() > w[1].acquired()) {
            log::warn!("Catalog returned scenes out of acquisition order, re-sorting");
            scenes.sort_by_key(|s| s.acquired());
        }

        if scenes.is_empty() {
            return Err(SarError::EmptyCollection(format!(
                "no scenes between {} and {} match the query",
                query.date_range.start, query.date_range.end
            )));
        }

        log::info!("Selected {} scenes", scenes.len());
        SceneCollection::new(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawParameters;
    use crate::types::{BoundingBox, OrbitPass};

    /// Catalog that returns its scenes verbatim, ignoring the query
    struct VerbatimCatalog(Vec<Scene>);

    impl SceneCatalog for VerbatimCatalog {
        fn query_scenes(&self, _query: &CatalogQuery) -> SarResult<Vec<Scene>> {
            Ok(self.0.clone())
        }
    }

    fn scene(day: u32, pass: OrbitPass, bands: &[&str]) -> Scene {
        Scene::new(
            format!("S1A_IW_GRDH_1SDV_202102{:02}T054117_202102{:02}T054142_035967_0436A1_8B59", day, day),
            pass,
            BoundingBox::from_rectangle([5.7, 52.6, 5.8, 52.8]).unwrap(),
            bands.iter().map(|b| b.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_select_sorts_and_filters_catalog_output() {
        let params = RawParameters::default().validate().unwrap();
        let full = ["VV", "VH", "angle"];
        let catalog = VerbatimCatalog(vec![
            scene(20, OrbitPass::Descending, &full),
            scene(2, OrbitPass::Descending, &full),
            scene(8, OrbitPass::Ascending, &full),
            scene(14, OrbitPass::Descending, &["VV", "angle"]),
            scene(11, OrbitPass::Descending, &full),
        ]);

        let collection = CollectionFilter::select(&params, &catalog).unwrap();
        let days: Vec<u32> = collection
            .iter()
            .map(|s| s.id()[23..25].parse().unwrap())
            .collect();
        assert_eq!(days, vec![2, 11, 20]);
        assert!(collection
            .scenes()
            .windows(2)
            .all(|w| w[0].acquired() <= w[1].acquired()));
    }

    #[test]
    fn test_no_match_is_empty_collection() {
        let params = RawParameters::default().validate().unwrap();
        let catalog = VerbatimCatalog(vec![scene(3, OrbitPass::Ascending, &["VV", "VH", "angle"])]);
        assert!(matches!(
            CollectionFilter::select(&params, &catalog),
            Err(SarError::EmptyCollection(_))
        ));
    }

    #[test]
    fn test_required_bands_follow_polarization() {
        let mut raw = RawParameters::default();
        raw.polarization = "VH".into();
        let query = CollectionFilter::query(&raw.validate().unwrap());
        assert_eq!(query.required_bands, vec!["VH".to_string(), "angle".to_string()]);
    }
}
