//! Output parsers for calculation jobs
//!
//! A parser receives the retrieved folders of a finished job keyed by link
//! name and answers `(success, outputs)`. Missing files are a logged failure;
//! parsing a calculation that is not in the parsing state is an error.

use std::{collections::BTreeMap, fs, path::Path};

use tracing::{Level, event};

use crate::domain::{
    constant,
    data::{Data, TrajectoryData, TrajectoryStep},
    error::EngineError,
    state::CalcJobState
};

/// Link name under which the job sandbox is handed to parsers
pub const RETRIEVED_LINK: &str = "retrieved";

pub type ParseResult = (bool, Vec<(String, Data)>);

/// What a parser knows about the calculation it parses
#[derive(Debug, Clone, PartialEq)]
pub struct CalcInfo {
    pub process_type:    String,
    pub state:           CalcJobState,
    pub output_filename: String,
    pub error_filename:  String
}

/// Files retrieved from a job sandbox, name to content
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedFolder {
    files: BTreeMap<String, String>
}

impl RetrievedFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.insert(name.to_string(), content.to_string());
        self
    }

    /// Read every regular file directly inside `dir`
    pub fn from_dir(dir: &Path) -> Result<Self, EngineError> {
        let mut files = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let content = fs::read(entry.path())?;
            let name = entry.file_name().to_string_lossy().to_string();
            files.insert(name, String::from_utf8_lossy(&content).to_string());
        }
        Ok(Self { files })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }
}

pub trait Parser: Send + Sync {
    fn parse_with_retrieved(&self, retrieved: &BTreeMap<String, RetrievedFolder>) -> Result<ParseResult, EngineError>;
}

fn check_parsing_state(info: &CalcInfo) -> Result<(), EngineError> {
    if info.state != CalcJobState::Parsing {
        return Err(EngineError::InvalidOperation(format!(
            "Calculation not in {} state",
            CalcJobState::Parsing
        )));
    }
    Ok(())
}

/// Standard output of the job, or `None` after logging why it is unavailable
fn fetch_output<'a>(info: &CalcInfo, retrieved: &'a BTreeMap<String, RetrievedFolder>) -> Option<&'a str> {
    let Some(folder) = retrieved.get(RETRIEVED_LINK) else {
        event!(
            Level::ERROR,
            event = constant::job::OUTPUT_FILES_MISSING,
            process_type = %info.process_type,
            "No retrieved folder found"
        );
        return None;
    };
    let output = folder.get(&info.output_filename);
    if output.is_none() {
        event!(
            Level::ERROR,
            event = constant::job::OUTPUT_FILES_MISSING,
            process_type = %info.process_type,
            file = %info.output_filename,
            "No output files found"
        );
    }
    output
}

/// Parser for NWChem standard output
///
/// Extracts the SCF "Final RHF results" block into `parameters` and, for
/// geometry optimisations, the per-step output coordinates into `trajectory`.
pub struct NwchemBasicParser {
    info: CalcInfo
}

impl NwchemBasicParser {
    pub const CALCULATION: &'static str = "nwchem.basic";

    pub fn new(info: &CalcInfo) -> Result<Self, EngineError> {
        if info.process_type != Self::CALCULATION {
            return Err(EngineError::Parsing(format!("Input calc must be a {} calculation", Self::CALCULATION)));
        }
        Ok(Self { info: info.clone() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    ScfModule,
    FinalRhf
}

fn normalize_key(raw: &str) -> String {
    let mut key = String::new();
    let mut separator = false;
    for c in raw.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c);
            separator = false;
        } else if !separator {
            key.push('_');
            separator = true;
        }
    }
    key
}

fn is_rule(line: &str) -> bool {
    line.trim().chars().all(|c| c == '-')
}

/// `key = number` lines of the results block
fn parse_result(line: &str) -> Option<(String, f64)> {
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    // Plain decimals only; exponent forms such as `1.0E-05` are skipped.
    if key.trim().is_empty() || !value.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '.') {
        return None;
    }
    Some((normalize_key(key), value.parse().ok()?))
}

fn parse_scale(line: &str) -> f64 {
    line.split_once("scale by")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(')').parse().ok())
        .unwrap_or(1.0)
}

/// `No. Tag Charge X Y Z` rows of a coordinate table
fn parse_coordinate(line: &str, scale: f64) -> Option<(String, [f64; 3])> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 || fields[0].parse::<usize>().is_err() {
        return None;
    }
    let x: f64 = fields[3].parse().ok()?;
    let y: f64 = fields[4].parse().ok()?;
    let z: f64 = fields[5].parse().ok()?;
    Some((fields[1].to_string(), [x * scale, y * scale, z * scale]))
}

impl Parser for NwchemBasicParser {
    fn parse_with_retrieved(&self, retrieved: &BTreeMap<String, RetrievedFolder>) -> Result<ParseResult, EngineError> {
        check_parsing_state(&self.info)?;

        let Some(output) = fetch_output(&self.info, retrieved) else {
            return Ok((false, Vec::new()));
        };

        let mut section = Section::Outside;
        let mut results = BTreeMap::new();
        let mut optimisation = false;
        let mut trajectory = TrajectoryData::default();
        let mut step: Option<u32> = None;
        let mut coordinates: Option<(f64, Vec<(String, [f64; 3])>)> = None;

        for line in output.lines() {
            let trimmed = line.trim();

            if let Some((scale, rows)) = coordinates.as_mut() {
                if let Some(row) = parse_coordinate(trimmed, *scale) {
                    rows.push(row);
                    continue;
                }
                if !trimmed.is_empty() || rows.is_empty() {
                    continue;
                }
                let (_, rows) = coordinates.take().unwrap_or_default();
                if trajectory.symbols.is_empty() {
                    trajectory.symbols = rows.iter().map(|(symbol, _)| symbol.clone()).collect();
                }
                let number = step.unwrap_or(trajectory.steps.len() as u32);
                trajectory
                    .steps
                    .push(TrajectoryStep { step: number, positions: rows.into_iter().map(|(_, p)| p).collect() });
                continue;
            }

            if trimmed == "NWChem SCF Module" {
                section = Section::ScfModule;
                continue;
            }
            if trimmed == "NWChem Geometry Optimization" {
                optimisation = true;
                continue;
            }
            if section == Section::ScfModule && trimmed.split_whitespace().eq(["Final", "RHF", "results"]) {
                section = Section::FinalRhf;
                continue;
            }
            if is_rule(trimmed) {
                continue;
            }
            if section == Section::FinalRhf {
                match parse_result(trimmed) {
                    Some((key, value)) => {
                        results.insert(key, serde_json::Value::from(value));
                    }
                    None => section = Section::ScfModule
                }
            }
            if optimisation {
                let tokens: Vec<&str> = trimmed.split_whitespace().collect();
                if tokens.len() == 2 && tokens[0] == "Step" {
                    if let Ok(number) = tokens[1].parse() {
                        step = Some(number);
                    }
                    continue;
                }
                if trimmed.starts_with("Output coordinates in a.u.") {
                    coordinates = Some((parse_scale(trimmed), Vec::new()));
                    continue;
                }
            }
        }

        let mut outputs = vec![("parameters".to_string(), Data::Parameters(results))];
        if !trajectory.steps.is_empty() {
            outputs.push(("trajectory".to_string(), Data::Trajectory(trajectory)));
        }
        Ok((true, outputs))
    }
}

/// Parser for the template replacer job: standard output becomes `output_data`
pub struct TemplateReplacerParser {
    info: CalcInfo
}

impl TemplateReplacerParser {
    pub const CALCULATION: &'static str = "core.templatereplacer";

    pub fn new(info: &CalcInfo) -> Result<Self, EngineError> {
        if info.process_type != Self::CALCULATION {
            return Err(EngineError::Parsing(format!("Input calc must be a {} calculation", Self::CALCULATION)));
        }
        Ok(Self { info: info.clone() })
    }
}

impl Parser for TemplateReplacerParser {
    fn parse_with_retrieved(&self, retrieved: &BTreeMap<String, RetrievedFolder>) -> Result<ParseResult, EngineError> {
        check_parsing_state(&self.info)?;

        let Some(output) = fetch_output(&self.info, retrieved) else {
            return Ok((false, Vec::new()));
        };

        let content = output.trim();
        let value = match content.parse::<i64>() {
            Ok(number) => serde_json::Value::from(number),
            Err(_) => match content.parse::<f64>() {
                Ok(number) => serde_json::Value::from(number),
                Err(_) => serde_json::Value::from(content)
            }
        };

        let mut data = BTreeMap::new();
        data.insert("value".to_string(), value);
        Ok((true, vec![("output_data".to_string(), Data::Parameters(data))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(state: CalcJobState) -> CalcInfo {
        CalcInfo {
            process_type:    NwchemBasicParser::CALCULATION.to_string(),
            state,
            output_filename: "aiida.out".to_string(),
            error_filename:  "aiida.err".to_string()
        }
    }

    fn retrieved(folder: RetrievedFolder) -> BTreeMap<String, RetrievedFolder> {
        let mut map = BTreeMap::new();
        map.insert(RETRIEVED_LINK.to_string(), folder);
        map
    }

    const SCF_OUTPUT: &str = "
                                 NWChem SCF Module
                                 -----------------

       Final RHF  results
       ------------------

         Total SCF energy =    -74.887314969206
      One-electron energy =   -122.180197208532
      Two-electron energy =     38.153844627713
 Nuclear repulsion energy =      9.139037611613

        Time for solution =      0.1s
";

    const OPTIMISATION_OUTPUT: &str = "
                           NWChem Geometry Optimization
                           ----------------------------

                                 Step   0

 Output coordinates in a.u. (scale by  1.000000000E+00 to convert to a.u.)

  No.       Tag          Charge          X              Y              Z
 ---- ---------------- ---------- -------------- -------------- --------------
    1 O                    8.0000     0.00000000     0.00000000     0.22143053
    2 H                    1.0000     0.00000000     1.43042809    -0.88572213

                                 Step   1

 Output coordinates in a.u. (scale by  1.000000000E+00 to convert to a.u.)

  No.       Tag          Charge          X              Y              Z
 ---- ---------------- ---------- -------------- -------------- --------------
    1 O                    8.0000     0.00000000     0.00000000     0.21000000
    2 H                    1.0000     0.00000000     1.40000000    -0.87000000

";

    #[test]
    fn test_missing_stdout_returns_failure_without_raising() {
        let parser = NwchemBasicParser::new(&info(CalcJobState::Parsing)).unwrap();
        let folder = RetrievedFolder::new().with_file("aiida.err", "");

        let (success, outputs) = parser.parse_with_retrieved(&retrieved(folder)).unwrap();
        assert!(!success);
        assert!(outputs.is_empty());

        let (success, outputs) = parser.parse_with_retrieved(&BTreeMap::new()).unwrap();
        assert!(!success);
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_wrong_state_is_invalid_operation() {
        let parser = NwchemBasicParser::new(&info(CalcJobState::Retrieving)).unwrap();
        let folder = RetrievedFolder::new().with_file("aiida.out", SCF_OUTPUT);
        assert!(matches!(parser.parse_with_retrieved(&retrieved(folder)), Err(EngineError::InvalidOperation(_))));
    }

    #[test]
    fn test_incompatible_calculation_is_rejected() {
        let mut other = info(CalcJobState::Parsing);
        other.process_type = "core.templatereplacer".to_string();
        assert!(matches!(NwchemBasicParser::new(&other), Err(EngineError::Parsing(_))));
    }

    #[test]
    fn test_final_rhf_results() {
        let parser = NwchemBasicParser::new(&info(CalcJobState::Parsing)).unwrap();
        let folder = RetrievedFolder::new().with_file("aiida.out", SCF_OUTPUT);

        let (success, outputs) = parser.parse_with_retrieved(&retrieved(folder)).unwrap();
        assert!(success);
        assert_eq!(outputs.len(), 1);

        let params = outputs[0].1.as_parameters().unwrap();
        assert_eq!(params["total_scf_energy"], serde_json::json!(-74.887314969206));
        assert_eq!(params["nuclear_repulsion_energy"], serde_json::json!(9.139037611613));
        assert!(!params.contains_key("time_for_solution"));
    }

    #[test]
    fn test_result_lines_accept_plain_decimals_only() {
        assert_eq!(parse_result("  Total SCF energy = -74.887 "), Some(("total_scf_energy".to_string(), -74.887)));
        assert_eq!(parse_result("Convergence threshold = 1.0E-05"), None);
        assert_eq!(parse_result(" = 3.0"), None);
    }

    #[test]
    fn test_geometry_optimisation_trajectory() {
        let parser = NwchemBasicParser::new(&info(CalcJobState::Parsing)).unwrap();
        let folder = RetrievedFolder::new().with_file("aiida.out", OPTIMISATION_OUTPUT);

        let (success, outputs) = parser.parse_with_retrieved(&retrieved(folder)).unwrap();
        assert!(success);

        let trajectory = match &outputs[1].1 {
            Data::Trajectory(trajectory) => trajectory,
            other => panic!("expected a trajectory, got {:?}", other)
        };
        assert_eq!(trajectory.symbols, vec!["O", "H"]);
        assert_eq!(trajectory.steps.len(), 2);
        assert_eq!(trajectory.steps[1].step, 1);
        assert_eq!(trajectory.steps[1].positions[1], [0.0, 1.4, -0.87]);
    }

    #[test]
    fn test_templatereplacer_reads_number() {
        let mut info = info(CalcJobState::Parsing);
        info.process_type = TemplateReplacerParser::CALCULATION.to_string();
        let parser = TemplateReplacerParser::new(&info).unwrap();
        let folder = RetrievedFolder::new().with_file("aiida.out", "42\n");

        let (success, outputs) = parser.parse_with_retrieved(&retrieved(folder)).unwrap();
        assert!(success);
        assert_eq!(outputs[0].1.as_parameters().unwrap()["value"], serde_json::json!(42));
    }
}
