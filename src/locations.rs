use std::collections::{BTreeMap, HashSet};

use anyhow::Result;

use crate::models::Location;

// name, country code, lat, lon, description, region
const DEFAULT_LOCATIONS: &[(&str, &str, f64, f64, &str, &str)] = &[
    ("New York", "US", 40.7128, -74.0060, "Financial Hub", "North America"),
    ("Los Angeles", "US", 34.0522, -118.2437, "Tech Hub", "North America"),
    ("Chicago", "US", 41.8781, -87.6298, "Industrial Hub", "North America"),
    ("Toronto", "CA", 43.6532, -79.3832, "Financial Center", "North America"),
    ("Vancouver", "CA", 49.2827, -123.1207, "Tech Hub", "North America"),
    ("London", "GB", 51.5074, -0.1278, "Financial Capital", "Europe"),
    ("Frankfurt", "DE", 50.1109, 8.6821, "Internet Exchange", "Europe"),
    ("Amsterdam", "NL", 52.3676, 4.9041, "Data Center Hub", "Europe"),
    ("Stockholm", "SE", 59.3293, 18.0686, "Nordic Tech Hub", "Europe"),
    ("Paris", "FR", 48.8566, 2.3522, "Cultural Center", "Europe"),
    ("Tokyo", "JP", 35.6762, 139.6503, "Tech Innovation", "Asia-Pacific"),
    ("Seoul", "KR", 37.5665, 126.9780, "Gaming Capital", "Asia-Pacific"),
    ("Singapore", "SG", 1.3521, 103.8198, "SE Asia Hub", "Asia-Pacific"),
    ("Hong Kong", "HK", 22.3193, 114.1694, "Financial Hub", "Asia-Pacific"),
    ("Sydney", "AU", -33.8688, 151.2093, "Pacific Hub", "Asia-Pacific"),
    ("Dubai", "AE", 25.2048, 55.2708, "Middle East Hub", "Middle East"),
    ("São Paulo", "BR", -23.5505, -46.6333, "Economic Hub", "South America"),
];

/// Immutable set of test locations, built once at startup.
#[derive(Debug, Clone)]
pub(crate) struct LocationCatalog {
    locations: Vec<Location>,
}

impl LocationCatalog {
    pub(crate) fn new(locations: Vec<Location>) -> Result<Self> {
        let mut seen = HashSet::new();
        for location in &locations {
            if location.name.trim().is_empty() {
                anyhow::bail!("location catalog contains an entry without a name");
            }
            if !seen.insert(location.name.as_str()) {
                anyhow::bail!("duplicate location in catalog: {}", location.name);
            }
        }
        Ok(Self { locations })
    }

    pub(crate) fn builtin() -> Result<Self> {
        let locations = DEFAULT_LOCATIONS
            .iter()
            .map(|&(name, cc, lat, lon, description, region)| Location {
                name: name.to_string(),
                country_code: cc.to_string(),
                lat,
                lon,
                description: description.to_string(),
                region: region.to_string(),
            })
            .collect();
        Self::new(locations)
    }

    pub(crate) fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub(crate) fn len(&self) -> usize {
        self.locations.len()
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.name == name)
    }

    /// Narrows the catalog to `names`, keeping catalog order.
    pub(crate) fn subset(&self, names: &[String]) -> Result<Self> {
        if let Some(unknown) = names.iter().find(|n| self.find(n).is_none()) {
            anyhow::bail!("unknown location: {}", unknown);
        }
        let locations = self
            .locations
            .iter()
            .filter(|l| names.contains(&l.name))
            .cloned()
            .collect();
        Self::new(locations)
    }

    /// Catalog entries grouped by region; regions come out sorted and entries keep
    /// catalog order.
    pub(crate) fn by_region(&self) -> BTreeMap<&str, Vec<&Location>> {
        let mut regions: BTreeMap<&str, Vec<&Location>> = BTreeMap::new();
        for location in &self.locations {
            regions
                .entry(location.region.as_str())
                .or_default()
                .push(location);
        }
        regions
    }

    pub(crate) fn regions(&self) -> Vec<&str> {
        self.by_region().into_keys().collect()
    }
}
