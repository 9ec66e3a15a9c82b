use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

// Include the default catalog at compile time
const DEFAULT_CATALOG: &str = include_str!("../default_diseases.txt");
pub const CATALOG_FILE_NAME: &str = "disease_catalog.txt";

pub const NO_LEAF_LABEL: &str = "No Bitter Gourd Leaf Detected";
pub const NO_DISEASE_LABEL: &str = "No Disease Detected";
pub const ERROR_LABEL: &str = "Error in Analysis";
pub const UNKNOWN_LABEL: &str = "Unknown";

const NO_LEAF_MARKERS: &[&str] = &[
    "no bitter gourd leaf",
    "walang nakitang dahon",
    "no leaf detected",
];
const NO_DISEASE_MARKERS: &[&str] = &["no disease", "walang nakitang sakit"];
const ERROR_MARKERS: &[&str] = &["error", "no valid detection", "invalid detection"];

static LOW_CONFIDENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*low confidence\s*\)").expect("valid regex"));
static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid regex"));

static BUILTIN: LazyLock<Taxonomy> = LazyLock::new(Taxonomy::builtin);

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("Disease catalog not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to read disease catalog {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid catalog entry at line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("{0:?} already exists. Remove it first if you want to reinitialize.")]
    AlreadyExists(PathBuf),

    #[error("Failed to write disease catalog {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Coarse bucket a normalized label falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Disease,
    NoDisease,
    NoLeaf,
    Error,
    Unknown,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Disease => "disease",
            Category::NoDisease => "no-disease",
            Category::NoLeaf => "no-leaf",
            Category::Error => "error",
            Category::Unknown => "unknown",
        }
    }

    /// Badge text shown next to a label in tables.
    pub fn display_name(self) -> &'static str {
        match self {
            Category::Disease => "Detected Disease",
            Category::NoDisease => "No Disease",
            Category::NoLeaf => "No Leaf Detected",
            Category::Error => "Error",
            Category::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub label: String,
    pub category: Category,
}

impl Classification {
    fn new(label: impl Into<String>, category: Category) -> Self {
        Self {
            label: label.into(),
            category,
        }
    }

    fn unknown() -> Self {
        Self::new(UNKNOWN_LABEL, Category::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseaseEntry {
    pub name: String,
    pub color: String,
    /// Lowercased; always contains the lowercased name.
    pub markers: Vec<String>,
}

/// Prioritized label rules: the fixed status rules (no leaf, no disease,
/// error) followed by the disease catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    diseases: Vec<DiseaseEntry>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        BUILTIN.clone()
    }
}

impl Taxonomy {
    pub fn builtin() -> Self {
        let diseases = parse_catalog(DEFAULT_CATALOG, false).unwrap_or_default();
        Self { diseases }
    }

    pub fn from_entries(diseases: Vec<DiseaseEntry>) -> Self {
        Self { diseases }
    }

    pub fn diseases(&self) -> &[DiseaseEntry] {
        &self.diseases
    }

    pub fn classify(&self, raw: Option<&str>) -> Classification {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Classification::unknown();
        };
        let lowered = raw.to_lowercase();

        if contains_any(&lowered, NO_LEAF_MARKERS) {
            return Classification::new(NO_LEAF_LABEL, Category::NoLeaf);
        }
        if contains_any(&lowered, NO_DISEASE_MARKERS) {
            return Classification::new(NO_DISEASE_LABEL, Category::NoDisease);
        }
        if contains_any(&lowered, ERROR_MARKERS) {
            return Classification::new(ERROR_LABEL, Category::Error);
        }
        if let Some(entry) = self
            .diseases
            .iter()
            .find(|entry| entry.markers.iter().any(|m| lowered.contains(m.as_str())))
        {
            return Classification::new(entry.name.clone(), Category::Disease);
        }

        let stripped = LOW_CONFIDENCE.replace_all(raw, "");
        let stripped = stripped.trim();
        if stripped.is_empty() || stripped.eq_ignore_ascii_case(UNKNOWN_LABEL) {
            Classification::unknown()
        } else {
            Classification::new(stripped, Category::Disease)
        }
    }

    pub fn normalize(&self, raw: Option<&str>) -> String {
        self.classify(raw).label
    }

    pub fn categorize(&self, raw: Option<&str>) -> Category {
        self.classify(raw).category
    }

    /// Catalog color of a known disease, matched exactly or by substring in
    /// either direction.
    pub fn known_color(&self, label: &str) -> Option<&str> {
        let lowered = label.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        self.diseases
            .iter()
            .find(|entry| {
                entry.markers.iter().any(|m| {
                    lowered == *m || lowered.contains(m.as_str()) || m.contains(lowered.as_str())
                })
            })
            .map(|entry| entry.color.as_str())
    }
}

/// Normalizes a label with the built-in catalog.
pub fn normalize(raw: Option<&str>) -> String {
    BUILTIN.normalize(raw)
}

/// Categorizes a raw or normalized label with the built-in catalog.
pub fn categorize(raw: Option<&str>) -> Category {
    BUILTIN.categorize(raw)
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

/// Parses catalog text. With `strict`, the first malformed line is an error;
/// otherwise malformed lines are logged and skipped.
pub fn parse_catalog(content: &str, strict: bool) -> Result<Vec<DiseaseEntry>, TaxonomyError> {
    let mut entries = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_entry(line) {
            Ok(entry) => entries.push(entry),
            Err(reason) if strict => {
                return Err(TaxonomyError::InvalidLine {
                    line: line_num + 1,
                    reason,
                })
            }
            Err(reason) => {
                warn!(action = "parse", component = "catalog_entry", line_number = line_num + 1, error = %reason, "Invalid catalog entry")
            }
        }
    }
    Ok(entries)
}

fn parse_entry(line: &str) -> Result<DiseaseEntry, String> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let [name, color, markers] = fields.as_slice() else {
        return Err(format!("expected 3 '|'-separated fields, found {}", fields.len()));
    };
    if name.is_empty() {
        return Err("empty disease name".to_string());
    }
    if !HEX_COLOR.is_match(color) {
        return Err(format!("'{}' is not a #RRGGBB color", color));
    }

    let mut entry_markers = vec![name.to_lowercase()];
    for marker in markers.split(',').map(|m| m.trim().to_lowercase()) {
        if !marker.is_empty() && !entry_markers.contains(&marker) {
            entry_markers.push(marker);
        }
    }

    Ok(DiseaseEntry {
        name: name.to_string(),
        color: color.to_uppercase(),
        markers: entry_markers,
    })
}

fn read_catalog(path: &Path) -> Result<String, TaxonomyError> {
    fs::read_to_string(path).map_err(|source| TaxonomyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the disease catalog: an explicit file, else `disease_catalog.txt` in
/// the working directory, else the embedded defaults.
pub fn load_taxonomy(catalog_path: Option<&Path>) -> Result<Taxonomy, TaxonomyError> {
    let start_time = Instant::now();
    info!(
        action = "start",
        component = "catalog_loading",
        "Starting disease catalog loading"
    );

    let mut diseases = Vec::new();

    if let Some(path) = catalog_path {
        info!(action = "load", component = "catalog_file", file_path = ?path, "Loading catalog from specified file");
        if !path.exists() {
            return Err(TaxonomyError::NotFound(path.to_path_buf()));
        }
        diseases = parse_catalog(&read_catalog(path)?, true)?;
        info!(action = "loaded", component = "catalog_file", disease_count = diseases.len(), file_path = ?path, "Loaded catalog from file");
    } else {
        let default_file = Path::new(CATALOG_FILE_NAME);
        if default_file.exists() {
            info!(action = "load", component = "default_catalog_file", file_path = ?default_file, "Loading catalog from default file");
            diseases = parse_catalog(&read_catalog(default_file)?, false)?;
            info!(action = "loaded", component = "default_catalog_file", disease_count = diseases.len(), file_path = ?default_file, "Loaded catalog from default file");
        }

        if diseases.is_empty() {
            info!(
                action = "load",
                component = "embedded_catalog",
                "Using embedded default catalog"
            );
            diseases = BUILTIN.diseases.clone();
        }
    }

    info!(
        action = "complete",
        component = "catalog_loading",
        disease_count = diseases.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Disease catalog ready"
    );
    Ok(Taxonomy { diseases })
}

/// Writes the embedded catalog to `dir/disease_catalog.txt`.
pub fn init_default_catalog(dir: &Path) -> Result<PathBuf, TaxonomyError> {
    let target = dir.join(CATALOG_FILE_NAME);
    if target.exists() {
        return Err(TaxonomyError::AlreadyExists(target));
    }
    fs::write(&target, DEFAULT_CATALOG).map_err(|source| TaxonomyError::Write {
        path: target.clone(),
        source,
    })?;
    Ok(target)
}
