//! Feature-group manifest
//!
//! Maps field names to column indices. Shard files are not
//! self-describing, so the manifest must match the producer's layout.

use std::collections::HashMap;

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{JetfeedError, Result};

/// Column layout of the reference (`singletons`) group
pub const SINGLETON_FIELDS: [&str; 10] = [
    "pt", "eta", "mass", "msd", "rho", "tau32", "tau21", "flavour", "nbHadrons", "nProngs",
];

/// Ordered field names with O(1) name lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureManifest {
    fields: Vec<String>,
    index: HashMap<String, usize>,
}

impl FeatureManifest {
    /// Build a manifest; a repeated name resolves to its first column
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(fields.len());
        for (column, name) in fields.iter().enumerate() {
            index.entry(name.clone()).or_insert(column);
        }
        Self { fields, index }
    }

    pub fn singletons() -> Self {
        Self::new(SINGLETON_FIELDS)
    }

    pub fn column(&self, field: &str) -> Result<usize> {
        self.index
            .get(field)
            .copied()
            .ok_or_else(|| JetfeedError::UnknownField {
                field: field.to_string(),
            })
    }

    pub fn columns<S: AsRef<str>>(&self, fields: &[S]) -> Result<Vec<usize>> {
        fields.iter().map(|f| self.column(f.as_ref())).collect()
    }

    /// View of one named column of a shard array
    pub fn view<'a>(&self, array: ArrayView2<'a, f64>, field: &str) -> Result<ArrayView1<'a, f64>> {
        let column = self.column(field)?;
        let width = array.ncols();
        if column >= width {
            return Err(JetfeedError::ColumnOutOfRange {
                field: field.to_string(),
                column,
                width,
            });
        }
        Ok(array.index_axis_move(Axis(1), column))
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FeatureManifest {
    fn default() -> Self {
        Self::singletons()
    }
}

impl From<Vec<String>> for FeatureManifest {
    fn from(fields: Vec<String>) -> Self {
        Self::new(fields)
    }
}

impl From<FeatureManifest> for Vec<String> {
    fn from(manifest: FeatureManifest) -> Self {
        manifest.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_singleton_columns() {
        let manifest = FeatureManifest::singletons();
        assert_eq!(manifest.column("pt").unwrap(), 0);
        assert_eq!(manifest.column("msd").unwrap(), 3);
        assert_eq!(manifest.column("nProngs").unwrap(), 9);
        assert_eq!(manifest.columns(&["nbHadrons", "eta"]).unwrap(), vec![8, 1]);
    }

    #[test]
    fn test_unknown_field() {
        let manifest = FeatureManifest::singletons();
        assert!(matches!(
            manifest.column("phi"),
            Err(JetfeedError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_view_checks_width() {
        let manifest = FeatureManifest::new(["a", "b", "c"]);
        let data = array![[1.0, 2.0], [3.0, 4.0]];

        assert_eq!(manifest.view(data.view(), "b").unwrap().to_vec(), vec![2.0, 4.0]);
        assert!(manifest.view(data.view(), "c").unwrap_err().is_consistency());
    }

    #[test]
    fn test_serde_as_list() {
        let manifest: FeatureManifest = serde_json::from_str(r#"["pt", "eta"]"#).unwrap();
        assert_eq!(manifest.column("eta").unwrap(), 1);
        assert_eq!(serde_json::to_string(&manifest).unwrap(), r#"["pt","eta"]"#);
    }
}
