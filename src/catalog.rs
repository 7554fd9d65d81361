use std::collections::BTreeMap;
use std::path::Path;

use crate::limits::*;
use crate::model::{Service, ServiceBlock};

/// The service catalog: code → ordered block list.
///
/// Built once at startup and shared read-only (`Arc<Catalog>`). There is no
/// way to mutate it after construction.
///
/// On disk it is a JSON object keyed by service code:
///
/// ```json
/// {
///   "CUT":   [{ "kind": "service", "duration_minutes": 30 }],
///   "COLOR": [{ "kind": "service", "duration_minutes": 40 },
///             { "kind": "pause",   "duration_minutes": 20 },
///             { "kind": "service", "duration_minutes": 15 }]
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    services: BTreeMap<String, Service>,
}

impl Catalog {
    pub fn new(services: impl IntoIterator<Item = Service>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for service in services {
            validate_service(&service)?;
            if map.contains_key(&service.code) {
                return Err(CatalogError::Duplicate(service.code));
            }
            map.insert(service.code.clone(), service);
            if map.len() > MAX_SERVICES {
                return Err(CatalogError::TooManyServices);
            }
        }
        Ok(Self { services: map })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, Vec<ServiceBlock>> =
            serde_json::from_str(json).map_err(|e| CatalogError::Json(e.to_string()))?;
        Self::new(raw.into_iter().map(|(code, blocks)| Service { code, blocks }))
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn get(&self, code: &str) -> Option<&Service> {
        self.services.get(code)
    }

    /// Every service, ordered by code.
    pub fn all(&self) -> &BTreeMap<String, Service> {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// A service with no blocks, or with pauses only, is accepted as-is.
fn validate_service(service: &Service) -> Result<(), CatalogError> {
    if service.code.is_empty() || service.code.len() > MAX_SERVICE_CODE_LEN {
        return Err(CatalogError::InvalidCode(service.code.clone()));
    }
    if service.blocks.len() > MAX_BLOCKS_PER_SERVICE {
        return Err(CatalogError::TooManyBlocks(service.code.clone()));
    }
    for (index, block) in service.blocks.iter().enumerate() {
        if block.duration_minutes == 0 || block.duration_minutes > MAX_BLOCK_MINUTES {
            return Err(CatalogError::InvalidBlock {
                code: service.code.clone(),
                index,
                duration_minutes: block.duration_minutes,
            });
        }
    }
    Ok(())
}

#[derive(Debug)]
pub enum CatalogError {
    Io(String),
    Json(String),
    Duplicate(String),
    InvalidCode(String),
    TooManyServices,
    TooManyBlocks(String),
    InvalidBlock {
        code: String,
        index: usize,
        duration_minutes: u32,
    },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "cannot read catalog: {e}"),
            CatalogError::Json(e) => write!(f, "malformed catalog: {e}"),
            CatalogError::Duplicate(code) => write!(f, "duplicate service code: {code}"),
            CatalogError::InvalidCode(code) => write!(f, "invalid service code: {code:?}"),
            CatalogError::TooManyServices => {
                write!(f, "catalog exceeds {MAX_SERVICES} services")
            }
            CatalogError::TooManyBlocks(code) => {
                write!(f, "service {code} exceeds {MAX_BLOCKS_PER_SERVICE} blocks")
            }
            CatalogError::InvalidBlock {
                code,
                index,
                duration_minutes,
            } => write!(
                f,
                "service {code} block {index}: duration {duration_minutes} must be within 1..={MAX_BLOCK_MINUTES} minutes"
            ),
        }
    }
}

impl std::error::Error for CatalogError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockKind;

    const SAMPLE: &str = r#"{
        "CUT": [{ "kind": "service", "duration_minutes": 30 }],
        "COLOR": [
            { "kind": "service", "duration_minutes": 40 },
            { "kind": "pause", "duration_minutes": 20 },
            { "kind": "service", "duration_minutes": 15 }
        ]
    }"#;

    #[test]
    fn parses_json_catalog() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 2);

        let color = catalog.get("COLOR").unwrap();
        assert_eq!(color.code, "COLOR");
        assert_eq!(color.blocks.len(), 3);
        assert_eq!(color.blocks[1].kind, BlockKind::Pause);
        assert_eq!(color.blocks[1].duration_minutes, 20);

        assert!(catalog.get("SHAVE").is_none());
    }

    #[test]
    fn all_is_ordered_by_code() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let codes: Vec<_> = catalog.all().keys().cloned().collect();
        assert_eq!(codes, vec!["COLOR".to_string(), "CUT".to_string()]);
    }

    #[test]
    fn block_order_is_preserved() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let kinds: Vec<_> = catalog.get("COLOR").unwrap().blocks.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![BlockKind::Service, BlockKind::Pause, BlockKind::Service]);
    }

    #[test]
    fn zero_block_service_is_accepted() {
        let catalog = Catalog::from_json(r#"{ "NOTHING": [] }"#).unwrap();
        assert!(catalog.get("NOTHING").unwrap().blocks.is_empty());
    }

    #[test]
    fn zero_duration_block_rejected() {
        let err = Catalog::from_json(r#"{ "BAD": [{ "kind": "service", "duration_minutes": 0 }] }"#)
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidBlock { index: 0, .. }));
    }

    #[test]
    fn unknown_kind_rejected() {
        let err = Catalog::from_json(r#"{ "BAD": [{ "kind": "nap", "duration_minutes": 5 }] }"#)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Json(_)));
    }

    #[test]
    fn duplicate_code_rejected() {
        let cut = Service::new("CUT", vec![ServiceBlock::service(30)]);
        let err = Catalog::new(vec![cut.clone(), cut]).unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate(code) if code == "CUT"));
    }

    #[test]
    fn too_many_blocks_rejected() {
        let blocks = vec![ServiceBlock::service(5); MAX_BLOCKS_PER_SERVICE + 1];
        let err = Catalog::new(vec![Service::new("LONG", blocks)]).unwrap_err();
        assert!(matches!(err, CatalogError::TooManyBlocks(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("chairbook_no_such_catalog.json");
        let err = Catalog::load(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Io(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = std::env::temp_dir().join("chairbook_test_catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("services.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.get("CUT").unwrap().total_minutes(), 30);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bundled_catalog_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("services.json");
        let catalog = Catalog::load(&path).unwrap();
        assert!(catalog.get("CUT").is_some());
        assert!(catalog.get("COLOR").unwrap().is_grouped());
    }
}
