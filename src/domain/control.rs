//! Estimator control file assembly.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::error::DomainError;
use crate::domain::prior::Prior;
use crate::domain::DomainResult;

/// Smallest sample count honored from the user.
pub const MIN_NSAMPLE: u64 = 1000;
pub const DEFAULT_NSAMPLE: u64 = 10000;
pub const BURNIN: u64 = 2000;
pub const SAMPFREQ: u64 = 5;

/// Nucleotide substitution models understood by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstitutionModel {
    #[serde(alias = "jc96")]
    Jc69,
    K80,
    F81,
    F84,
    #[default]
    Hky85,
    Gtr,
}

impl SubstitutionModel {
    pub const NAMES: [&'static str; 6] = ["jc69", "k80", "f81", "f84", "hky85", "gtr"];

    /// Numeric code used in the control file.
    pub fn code(self) -> u8 {
        match self {
            SubstitutionModel::Jc69 => 0,
            SubstitutionModel::K80 => 1,
            SubstitutionModel::F81 => 2,
            SubstitutionModel::F84 => 3,
            SubstitutionModel::Hky85 => 4,
            SubstitutionModel::Gtr => 7,
        }
    }
}

impl FromStr for SubstitutionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jc69" | "jc96" => Ok(SubstitutionModel::Jc69),
            "k80" => Ok(SubstitutionModel::K80),
            "f81" => Ok(SubstitutionModel::F81),
            "f84" => Ok(SubstitutionModel::F84),
            "hky85" => Ok(SubstitutionModel::Hky85),
            "gtr" => Ok(SubstitutionModel::Gtr),
            other => Err(format!(
                "unknown substitution model '{}', expected one of: {}",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for SubstitutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubstitutionModel::Jc69 => "jc69",
            SubstitutionModel::K80 => "k80",
            SubstitutionModel::F81 => "f81",
            SubstitutionModel::F84 => "f84",
            SubstitutionModel::Hky85 => "hky85",
            SubstitutionModel::Gtr => "gtr",
        };
        f.write_str(name)
    }
}

/// Inputs for one control file.
#[derive(Debug, Clone)]
pub struct ControlParams {
    pub seqfile: PathBuf,
    pub treefile: PathBuf,
    pub mcmcfile: PathBuf,
    pub outfile: PathBuf,
    pub model: SubstitutionModel,
    pub mut_rate: f64,
    pub nsample: Option<u64>,
    pub root_age: Option<Prior>,
}

/// Ordered `name = value` parameters for the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFile {
    entries: Vec<(&'static str, String)>,
}

impl ControlFile {
    pub fn assemble(params: &ControlParams) -> DomainResult<Self> {
        let path = |p: &PathBuf| p.display().to_string();
        let mut entries = vec![
            ("seed", "-1".to_string()),
            ("seqfile", path(&params.seqfile)),
            ("treefile", path(&params.treefile)),
            ("mcmcfile", path(&params.mcmcfile)),
            ("outfile", path(&params.outfile)),
            ("ndata", "1".to_string()),
            ("seqtype", "0".to_string()),
            ("usedata", "1".to_string()),
            ("clock", "1".to_string()),
            ("model", params.model.code().to_string()),
            ("alpha", "0".to_string()),
            ("ncatG", "5".to_string()),
            ("cleandata", "0".to_string()),
            ("BDparas", "1 1 0.1".to_string()),
            ("kappa_gamma", "6 2".to_string()),
            ("alpha_gamma", "1 1".to_string()),
            ("rgene_gamma", rgene_gamma(params.mut_rate)?),
            ("print", "1".to_string()),
            ("burnin", BURNIN.to_string()),
            ("sampfreq", SAMPFREQ.to_string()),
            ("nsample", resolve_nsample(params.nsample).to_string()),
        ];
        if let Some(root_age) = params.root_age {
            entries.push(("RootAge", root_age.to_string()));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| *k)
    }

    /// One line per parameter, names right-aligned to the longest.
    pub fn render(&self) -> String {
        let width = self.entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        self.entries
            .iter()
            .map(|(k, v)| format!("{:>width$} = {}\n", k, v, width = width))
            .collect()
    }
}

/// Gamma prior on the mutation rate: shape 1, scale shape / rate.
pub fn rgene_gamma(rate: f64) -> DomainResult<String> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(DomainError::InvalidParameter(format!(
            "mutation rate must be positive, got {rate}"
        )));
    }
    let alpha = 1.0;
    let beta = alpha / rate;
    Ok(format!("{} {} {}", alpha, beta, 1))
}

/// User sample count if large enough, otherwise the default.
pub fn resolve_nsample(requested: Option<u64>) -> u64 {
    match requested {
        Some(n) if n >= MIN_NSAMPLE => n,
        Some(n) => {
            warn!(
                "Step for MCMC is too small ({} < {}), default value {} will be used",
                n, MIN_NSAMPLE, DEFAULT_NSAMPLE
            );
            DEFAULT_NSAMPLE
        }
        None => DEFAULT_NSAMPLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn params() -> ControlParams {
        ControlParams {
            seqfile: PathBuf::from("/tmp/run/seq.txt"),
            treefile: PathBuf::from("/tmp/run/tree.txt"),
            mcmcfile: PathBuf::from("/out/T.mcmc.txt"),
            outfile: PathBuf::from("/out/T.out.txt"),
            model: SubstitutionModel::Hky85,
            mut_rate: 7.6e-10,
            nsample: None,
            root_age: None,
        }
    }

    #[rstest]
    #[case("jc69", 0)]
    #[case("jc96", 0)]
    #[case("k80", 1)]
    #[case("f81", 2)]
    #[case("F84", 3)]
    #[case("hky85", 4)]
    #[case("gtr", 7)]
    fn given_model_name_when_parsing_then_maps_code(#[case] name: &str, #[case] code: u8) {
        let model: SubstitutionModel = name.parse().unwrap();
        assert_eq!(model.code(), code);
    }

    #[test]
    fn given_unknown_model_when_parsing_then_errors() {
        assert!("tn93".parse::<SubstitutionModel>().is_err());
    }

    #[test]
    fn given_default_params_when_assembling_then_order_is_fixed() {
        let control = ControlFile::assemble(&params()).unwrap();
        let names: Vec<_> = control.names().collect();
        assert_eq!(
            names,
            vec![
                "seed", "seqfile", "treefile", "mcmcfile", "outfile", "ndata", "seqtype", "usedata",
                "clock", "model", "alpha", "ncatG", "cleandata", "BDparas", "kappa_gamma",
                "alpha_gamma", "rgene_gamma", "print", "burnin", "sampfreq", "nsample",
            ]
        );
        assert_eq!(control.get("model"), Some("4"));
        assert_eq!(control.get("nsample"), Some("10000"));
        assert_eq!(control.get("RootAge"), None);
    }

    #[test]
    fn given_root_age_when_assembling_then_appends_parameter() {
        let mut p = params();
        p.root_age = Some(Prior::Bounded(0.8, 1.2));
        let control = ControlFile::assemble(&p).unwrap();

        assert_eq!(control.names().last(), Some("RootAge"));
        assert_eq!(control.get("RootAge"), Some("B(0.8, 1.2)"));
    }

    #[test]
    fn given_control_when_rendering_then_names_right_aligned() {
        let control = ControlFile::assemble(&params()).unwrap();
        let rendered = control.render();
        let lines: Vec<_> = rendered.lines().collect();

        assert_eq!(lines[0], "       seed = -1");
        assert_eq!(lines[14], "kappa_gamma = 6 2");
        assert!(lines.iter().all(|l| l.find(" = ") == Some(11)));
    }

    #[test]
    fn given_rate_when_computing_gamma_then_scale_is_inverse() {
        assert_eq!(rgene_gamma(0.5).unwrap(), "1 2 1");
        assert_eq!(rgene_gamma(7.6e-10).unwrap(), format!("1 {} 1", 1.0 / 7.6e-10));
        assert!(rgene_gamma(0.0).is_err());
        assert!(rgene_gamma(-1.0).is_err());
    }

    #[rstest]
    #[case(None, DEFAULT_NSAMPLE)]
    #[case(Some(500), DEFAULT_NSAMPLE)]
    #[case(Some(MIN_NSAMPLE), MIN_NSAMPLE)]
    #[case(Some(20000), 20000)]
    fn given_requested_samples_when_resolving_then_applies_threshold(
        #[case] requested: Option<u64>,
        #[case] expected: u64,
    ) {
        assert_eq!(resolve_nsample(requested), expected);
    }
}
