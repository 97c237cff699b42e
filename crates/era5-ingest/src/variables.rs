//! Variable table and two-tier message identity resolution.

use serde::{Deserialize, Serialize};

/// One variable to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Column name in the output table
    pub key: String,
    /// Expected GRIB short name
    pub short_name: String,
    /// ECMWF parameter id, e.g. `140229`
    pub param_id: u32,
}

impl VariableSpec {
    pub fn new(key: &str, short_name: &str, param_id: u32) -> Self {
        Self {
            key: key.to_string(),
            short_name: short_name.to_string(),
            param_id,
        }
    }

    /// Parameter number within its table (`140229` -> 229).
    pub fn parameter_number(&self) -> u32 {
        self.param_id % 1000
    }

    /// GRIB 1 table version (`140229` -> 140). Ids below 1000 belong to
    /// table 128.
    pub fn table_version(&self) -> u32 {
        match self.param_id / 1000 {
            0 => 128,
            table => table,
        }
    }

    pub fn code(&self) -> String {
        parameter_code(self.parameter_number(), self.table_version())
    }
}

/// `"{parameterNumber}.{tableVersion}"`, e.g. `"229.140"`.
pub fn parameter_code(parameter_number: u32, table_version: u32) -> String {
    format!("{}.{}", parameter_number, table_version)
}

/// The five wave and wind variables extracted by default.
pub fn default_variables() -> Vec<VariableSpec> {
    vec![
        VariableSpec::new("swh", "swh", 140229),
        VariableSpec::new("mwd", "mwd", 140230),
        VariableSpec::new("pp1d", "pp1d", 140231),
        VariableSpec::new("wind", "wind", 140245),
        VariableSpec::new("dwi", "dwi", 140249),
    ]
}

/// How a message was matched to a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    ShortName,
    ParameterCode,
}

/// Ordered set of variables with identity resolution.
#[derive(Debug, Clone)]
pub struct VariableTable {
    specs: Vec<VariableSpec>,
}

impl VariableTable {
    pub fn new(specs: Vec<VariableSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[VariableSpec] {
        &self.specs
    }

    /// Keys in table order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Parameter ids to request from the archive.
    pub fn param_ids(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.param_id.to_string()).collect()
    }

    /// Resolve a message to a variable.
    ///
    /// Tier 1 matches the short name exactly. Tier 2 matches
    /// `"{parameter_number}.{table_version}"` against each variable's code
    /// and is only consulted when tier 1 finds nothing.
    pub fn resolve(
        &self,
        short_name: Option<&str>,
        parameter_number: Option<u32>,
        table_version: Option<u32>,
    ) -> Option<(&VariableSpec, MatchTier)> {
        if let Some(name) = short_name {
            if let Some(spec) = self.specs.iter().find(|s| s.short_name == name) {
                return Some((spec, MatchTier::ShortName));
            }
        }

        let code = parameter_code(parameter_number?, table_version?);
        self.specs
            .iter()
            .find(|s| s.code() == code)
            .map(|spec| (spec, MatchTier::ParameterCode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_rendering() {
        assert_eq!(VariableSpec::new("swh", "swh", 140229).code(), "229.140");
        assert_eq!(VariableSpec::new("dwi", "dwi", 140249).code(), "249.140");
        assert_eq!(VariableSpec::new("u10", "10u", 165).code(), "165.128");
        assert_eq!(VariableSpec::new("tp", "tp", 228228).code(), "228.228");
        assert_eq!(parameter_code(229, 140), "229.140");
    }

    #[test]
    fn test_tier1_short_name() {
        let table = VariableTable::new(default_variables());
        let (spec, tier) = table.resolve(Some("pp1d"), None, None).unwrap();
        assert_eq!(spec.key, "pp1d");
        assert_eq!(tier, MatchTier::ShortName);
    }

    #[test]
    fn test_tier2_code_fallback() {
        let table = VariableTable::new(default_variables());
        let (spec, tier) = table.resolve(Some("unknown"), Some(245), Some(140)).unwrap();
        assert_eq!(spec.key, "wind");
        assert_eq!(tier, MatchTier::ParameterCode);

        let (spec, _) = table.resolve(None, Some(230), Some(140)).unwrap();
        assert_eq!(spec.key, "mwd");
    }

    #[test]
    fn test_tier1_wins_over_tier2_for_every_entry() {
        let table = VariableTable::new(default_variables());
        let specs = table.specs().to_vec();
        for (i, spec) in specs.iter().enumerate() {
            // Code points at a different variable; short name must win
            let other = &specs[(i + 1) % specs.len()];
            let (resolved, tier) = table
                .resolve(
                    Some(&spec.short_name),
                    Some(other.parameter_number()),
                    Some(other.table_version()),
                )
                .unwrap();
            assert_eq!(resolved.key, spec.key);
            assert_eq!(tier, MatchTier::ShortName);
        }
    }

    #[test]
    fn test_unmatched() {
        let table = VariableTable::new(default_variables());
        assert!(table.resolve(Some("2t"), Some(167), Some(128)).is_none());
        assert!(table.resolve(None, Some(229), None).is_none());
        assert!(table.resolve(None, None, None).is_none());
    }

    #[test]
    fn test_table_version_must_match() {
        let table = VariableTable::new(default_variables());
        assert!(table.resolve(None, Some(229), Some(128)).is_none());
    }
}
