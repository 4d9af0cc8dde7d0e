use crate::error::LookupError;
use crate::models::{ExtractionResult, Field, FieldCandidate};
use crate::text::fold_name;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(rename = "PERITO", default)]
    name: String,
    #[serde(rename = "CPF/CNPJ", default)]
    tax_id: String,
}

/// Known experts keyed by folded name. Used to drop parties that are really
/// the expert and to correct the expert's tax id.
#[derive(Debug, Clone, Default)]
pub struct ExpertCatalog {
    names: BTreeSet<String>,
    tax_ids: BTreeMap<String, String>,
}

impl ExpertCatalog {
    pub fn from_entries<'a>(rows: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut catalog = Self::default();
        for (name, tax_id) in rows {
            catalog.insert(name, tax_id);
        }
        catalog
    }

    /// Reads a CSV with `PERITO` and `CPF/CNPJ` headers.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LookupError> {
        let mut csv = csv::Reader::from_reader(reader);
        let mut catalog = Self::default();
        for row in csv.deserialize::<CatalogRow>() {
            let row = row?;
            catalog.insert(&row.name, &row.tax_id);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, LookupError> {
        Self::from_reader(File::open(path)?)
    }

    fn insert(&mut self, name: &str, tax_id: &str) {
        let key = fold_name(name);
        if key.is_empty() {
            return;
        }
        let tax_id = tax_id.trim();
        if !tax_id.is_empty() {
            self.tax_ids.entry(key.clone()).or_insert_with(|| tax_id.to_string());
        }
        self.names.insert(key);
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&fold_name(name))
    }

    pub fn tax_id(&self, name: &str) -> Option<&str> {
        self.tax_ids.get(&fold_name(name)).map(String::as_str)
    }

    /// Clears parties that name a catalogued expert and replaces a differing
    /// expert tax id with the catalogued one.
    pub fn scrub(&self, result: &mut ExtractionResult) {
        if self.is_empty() {
            return;
        }

        for field in [Field::Plaintiff, Field::Defendant] {
            let is_expert = result.get(field).is_some_and(|value| self.contains(value));
            if is_expert {
                result.clear(field);
                result.observe(format!("{} coincidia com nome de perito; valor removido", field.column()));
            }
        }

        let Some(expert) = result.get(Field::Expert).map(str::to_string) else {
            return;
        };
        let Some(known) = self.tax_id(&expert) else {
            return;
        };
        if result.get(Field::ExpertTaxId) != Some(known) {
            let candidate = FieldCandidate::new(Field::ExpertTaxId, known, "catalogo_peritos")
                .with_pattern("catalogo_peritos")
                .with_weight(f64::MAX)
                .located_in(None);
            result.set(candidate);
            result.observe("CPF do perito ajustado pelo catálogo externo");
        }
    }
}
