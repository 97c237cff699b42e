//! Parameter lookup tables.
//!
//! Translates numeric parameter codes into short names such as `swh` or
//! `2t`. Edition 1 parameters are keyed by (table version, indicator of
//! parameter), edition 2 parameters by (discipline, category, number).
//!
//! A file whose messages have no entry here can still be matched by numeric
//! code; see [`ParameterCode`].

use std::collections::HashMap;

use crate::ParameterCode;

/// Lookup key for edition 1 parameters: (table version, parameter)
pub type Edition1Key = (u8, u8);

/// Lookup key for edition 2 parameters: (discipline, category, number)
pub type Edition2Key = (u8, u8, u8);

/// ECMWF local table 128 (atmospheric surface fields).
const ECMWF_TABLE_128: &[(u8, &str)] = &[
    (34, "sst"),
    (134, "sp"),
    (151, "msl"),
    (164, "tcc"),
    (165, "10u"),
    (166, "10v"),
    (167, "2t"),
    (168, "2d"),
    (207, "10si"),
    (228, "tp"),
];

/// ECMWF local table 140 (ocean wave fields).
const ECMWF_TABLE_140: &[(u8, &str)] = &[
    (229, "swh"),
    (230, "mwd"),
    (231, "pp1d"),
    (232, "mwp"),
    (245, "wind"),
    (249, "dwi"),
];

/// WMO edition 2 parameters commonly present in reanalysis output.
const WMO_EDITION_2: &[(Edition2Key, &str)] = &[
    ((0, 0, 0), "t"),
    ((0, 2, 0), "wdir"),
    ((0, 2, 1), "ws"),
    ((0, 3, 1), "prmsl"),
    ((10, 0, 3), "swh"),
    ((10, 0, 14), "mwd"),
    ((10, 0, 34), "pp1d"),
];

/// Short name lookup tables for both editions.
#[derive(Debug, Clone, Default)]
pub struct GribTables {
    edition1: HashMap<Edition1Key, String>,
    edition2: HashMap<Edition2Key, String>,
}

impl GribTables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables preloaded with the ECMWF and WMO short names used by ERA5.
    pub fn ecmwf() -> Self {
        let mut tables = Self::new();
        for (param, name) in ECMWF_TABLE_128 {
            tables.add_edition1(128, *param, name.to_string());
        }
        for (param, name) in ECMWF_TABLE_140 {
            tables.add_edition1(140, *param, name.to_string());
        }
        for ((discipline, category, number), name) in WMO_EDITION_2 {
            tables.add_edition2(*discipline, *category, *number, name.to_string());
        }
        tables
    }

    pub fn add_edition1(&mut self, table_version: u8, parameter: u8, name: String) {
        self.edition1.insert((table_version, parameter), name);
    }

    pub fn add_edition2(&mut self, discipline: u8, category: u8, number: u8, name: String) {
        self.edition2.insert((discipline, category, number), name);
    }

    /// Look up the short name for a parameter code.
    pub fn short_name(&self, code: &ParameterCode) -> Option<&str> {
        match *code {
            ParameterCode::Edition1 {
                table_version,
                indicator,
            } => self.edition1.get(&(table_version, indicator)),
            ParameterCode::Edition2 {
                discipline,
                category,
                number,
            } => self.edition2.get(&(discipline, category, number)),
        }
        .map(String::as_str)
    }

    /// Get the number of parameters in the tables
    pub fn parameter_count(&self) -> usize {
        self.edition1.len() + self.edition2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edition1.is_empty() && self.edition2.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecmwf_wave_parameters() {
        let tables = GribTables::ecmwf();
        let swh = ParameterCode::Edition1 {
            table_version: 140,
            indicator: 229,
        };
        let wind = ParameterCode::Edition1 {
            table_version: 140,
            indicator: 245,
        };
        assert_eq!(tables.short_name(&swh), Some("swh"));
        assert_eq!(tables.short_name(&wind), Some("wind"));
    }

    #[test]
    fn test_table_version_distinguishes_parameters() {
        let tables = GribTables::ecmwf();
        // 229 in table 128 is not significant wave height
        let code = ParameterCode::Edition1 {
            table_version: 128,
            indicator: 229,
        };
        assert_eq!(tables.short_name(&code), None);
    }

    #[test]
    fn test_edition2_lookup() {
        let tables = GribTables::ecmwf();
        let code = ParameterCode::Edition2 {
            discipline: 10,
            category: 0,
            number: 3,
        };
        assert_eq!(tables.short_name(&code), Some("swh"));
    }

    #[test]
    fn test_custom_entries_override() {
        let mut tables = GribTables::ecmwf();
        tables.add_edition1(140, 229, "hs".to_string());
        let code = ParameterCode::Edition1 {
            table_version: 140,
            indicator: 229,
        };
        assert_eq!(tables.short_name(&code), Some("hs"));
    }

    #[test]
    fn test_empty_tables() {
        let tables = GribTables::new();
        assert!(tables.is_empty());
        assert_eq!(tables.parameter_count(), 0);
        assert_eq!(
            tables.short_name(&ParameterCode::Edition1 {
                table_version: 140,
                indicator: 229
            }),
            None
        );
    }
}
