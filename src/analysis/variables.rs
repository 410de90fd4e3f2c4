use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::{YieldError, YieldResult};
use crate::histoer::cuts::{Cut, Cut1D, Cuts, Operator, ParsedCondition};
use crate::util::event_table::EventTable;

/// Fixed-width binning over `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    pub bins: usize,
    pub min: f64,
    pub max: f64,
}

impl Binning {
    pub fn new(bins: usize, min: f64, max: f64) -> YieldResult<Self> {
        let binning = Self { bins, min, max };
        binning.validate()?;
        Ok(binning)
    }

    pub fn validate(&self) -> YieldResult<()> {
        if self.bins == 0 {
            return Err(YieldError::Binning("number of bins must be positive".to_string()));
        }
        if !(self.min < self.max) {
            return Err(YieldError::Binning(format!(
                "min ({}) must be below max ({})",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

fn is_column_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// What gets histogrammed on the data side: a column, or the quotient of two.
///
/// Written in settings as `"H.gtr.dp"` or `"P.gtr.p/H.kin.primary.nu"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataExpr {
    Column(String),
    Ratio {
        numerator: String,
        denominator: String,
    },
}

impl DataExpr {
    pub fn parse(expr: &str) -> YieldResult<Self> {
        let invalid = || YieldError::Settings(format!("invalid data expression '{expr}'"));

        let parts: Vec<&str> = expr.split('/').map(str::trim).collect();
        match parts.as_slice() {
            [column] if is_column_name(column) => Ok(DataExpr::Column(column.to_string())),
            [numerator, denominator]
                if is_column_name(numerator) && is_column_name(denominator) =>
            {
                Ok(DataExpr::Ratio {
                    numerator: numerator.to_string(),
                    denominator: denominator.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }

    pub fn columns(&self) -> Vec<String> {
        match self {
            DataExpr::Column(column) => vec![column.clone()],
            DataExpr::Ratio {
                numerator,
                denominator,
            } => vec![numerator.clone(), denominator.clone()],
        }
    }

    /// Rows a quotient is undefined for: `denominator > 0` must hold.
    pub fn guard(&self) -> Option<Cut> {
        match self {
            DataExpr::Column(_) => None,
            DataExpr::Ratio { denominator, .. } => Some(Cut::Cut1D(Cut1D {
                name: format!("{denominator}_positive"),
                expression: format!("({denominator}>0)"),
                conditions: vec![ParsedCondition::new(
                    denominator,
                    Operator::Greater,
                    0.0,
                )],
            })),
        }
    }

    /// The selection with this expression's guard (if any) ANDed in.
    pub fn guarded(&self, selection: &Cuts) -> Cuts {
        match self.guard() {
            Some(guard) => selection.with(guard),
            None => selection.clone(),
        }
    }

    pub fn evaluate(&self, events: &EventTable) -> YieldResult<Vec<f64>> {
        match self {
            DataExpr::Column(column) => Ok(events.column(column)?.to_vec()),
            DataExpr::Ratio {
                numerator,
                denominator,
            } => {
                let num = events.column(numerator)?;
                let den = events.column(denominator)?;
                Ok(num.iter().zip(den).map(|(n, d)| n / d).collect())
            }
        }
    }
}

impl Display for DataExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataExpr::Column(column) => write!(f, "{column}"),
            DataExpr::Ratio {
                numerator,
                denominator,
            } => write!(f, "{numerator}/{denominator}"),
        }
    }
}

impl TryFrom<String> for DataExpr {
    type Error = YieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DataExpr::parse(&value)
    }
}

impl From<DataExpr> for String {
    fn from(value: DataExpr) -> Self {
        value.to_string()
    }
}

/// One comparable quantity: the simulation column, its data-side expression and binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub sim: String,
    pub data: DataExpr,
    pub binning: Binning,
}

/// Simulation name to data expression table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableMap {
    pub variables: BTreeMap<String, Variable>,
}

impl VariableMap {
    /// HMS/SHMS target quantities and the semi-inclusive kinematics.
    pub fn builtin() -> Self {
        let table: [(&str, &str, usize, f64, f64); 16] = [
            ("hsdelta", "H.gtr.dp", 300, -12.0, 12.0),
            ("hsytar", "H.gtr.y", 300, -5.0, 5.0),
            ("hsxptar", "H.gtr.th", 300, -0.25, 0.25),
            ("hsyptar", "H.gtr.ph", 300, -0.25, 0.25),
            ("ssdelta", "P.gtr.dp", 300, -25.0, 25.0),
            ("ssytar", "P.gtr.y", 300, -5.0, 5.0),
            ("ssxptar", "P.gtr.th", 300, -1.0, 1.0),
            ("ssyptar", "P.gtr.ph", 300, -1.0, 1.0),
            ("z", "P.gtr.p/H.kin.primary.nu", 300, 0.0, 1.0),
            ("xbj", "H.kin.primary.x_bj", 300, 0.0, 1.0),
            ("Q2", "H.kin.primary.Q2", 300, 0.0, 12.0),
            ("W", "H.kin.primary.W", 300, 0.0, 4.5),
            ("nu", "H.kin.primary.nu", 300, 0.0, 8.0),
            ("epsilon", "H.kin.primary.epsilon", 300, 0.0, 1.0),
            ("thetapq", "P.kin.secondary.th_xq", 300, 0.0, 0.3),
            ("phipq", "P.kin.secondary.ph_xq", 300, 0.0, 7.0),
        ];

        let mut map = Self::default();
        for (sim, data, bins, min, max) in table {
            if let Ok(data) = DataExpr::parse(data) {
                map.insert(Variable {
                    sim: sim.to_string(),
                    data,
                    binning: Binning { bins, min, max },
                });
            }
        }
        map
    }

    pub fn insert(&mut self, variable: Variable) {
        self.variables.insert(variable.sim.clone(), variable);
    }

    pub fn get(&self, sim: &str) -> YieldResult<&Variable> {
        self.variables
            .get(sim)
            .ok_or_else(|| YieldError::UnknownVariable(sim.to_string()))
    }

    /// Look up every name, failing on the first unknown one.
    pub fn resolve(&self, names: &[String]) -> YieldResult<Vec<Variable>> {
        names
            .iter()
            .map(|name| self.get(name).cloned())
            .collect()
    }

    pub fn validate(&self) -> YieldResult<()> {
        for variable in self.variables.values() {
            variable.binning.validate().map_err(|e| {
                YieldError::Settings(format!("variable '{}': {e}", variable.sim))
            })?;
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binning_validation() {
        assert!(Binning::new(300, -12.0, 12.0).is_ok());
        assert!(Binning::new(0, 0.0, 1.0).is_err());
        assert!(Binning::new(10, 1.0, 1.0).is_err());
        assert!(Binning::new(10, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn parses_column_and_quotient() {
        assert_eq!(
            DataExpr::parse("H.gtr.dp").unwrap(),
            DataExpr::Column("H.gtr.dp".to_string())
        );
        let z = DataExpr::parse("P.gtr.p / H.kin.primary.nu").unwrap();
        assert_eq!(z.columns(), vec!["P.gtr.p", "H.kin.primary.nu"]);
        assert_eq!(z.to_string(), "P.gtr.p/H.kin.primary.nu");
        assert!(DataExpr::parse("a/b/c").is_err());
        assert!(DataExpr::parse("1abc").is_err());
        assert!(DataExpr::parse("").is_err());
    }

    #[test]
    fn quotient_adds_positive_denominator_guard() {
        let events = EventTable::from_columns(vec![
            ("P.gtr.p".to_string(), vec![2.0, 3.0, 1.0]),
            ("H.kin.primary.nu".to_string(), vec![4.0, 0.0, -2.0]),
        ])
        .unwrap();
        let z = DataExpr::parse("P.gtr.p/H.kin.primary.nu").unwrap();
        let selection = z.guarded(&Cuts::default());
        assert_eq!(selection.create_mask(&events).unwrap(), vec![true, false, false]);
        assert_eq!(z.evaluate(&events).unwrap()[0], 0.5);

        let plain = DataExpr::parse("P.gtr.p").unwrap();
        assert!(plain.guard().is_none());
        assert!(plain.guarded(&Cuts::default()).is_empty());
    }

    #[test]
    fn builtin_map_links_simulation_names() {
        let map = VariableMap::builtin();
        assert_eq!(map.variables.len(), 16);
        assert_eq!(
            map.get("hsdelta").unwrap().data,
            DataExpr::Column("H.gtr.dp".to_string())
        );
        assert_eq!(map.get("phipq").unwrap().binning.max, 7.0);
        assert!(matches!(map.get("z").unwrap().data, DataExpr::Ratio { .. }));
        assert!(map.validate().is_ok());
    }

    #[test]
    fn unknown_variable_fails_resolution() {
        let map = VariableMap::builtin();
        let err = map
            .resolve(&["hsdelta".to_string(), "bogus".to_string()])
            .unwrap_err();
        assert!(matches!(err, YieldError::UnknownVariable(name) if name == "bogus"));
    }

    #[test]
    fn data_expr_serde_uses_string_form() {
        let var: Variable = serde_yaml::from_str(
            "sim: z\ndata: P.gtr.p/H.kin.primary.nu\nbinning: {bins: 10, min: 0.0, max: 1.0}\n",
        )
        .unwrap();
        assert_eq!(var.data.columns().len(), 2);
        assert!(serde_yaml::from_str::<Variable>("sim: z\ndata: 'a/'\nbinning: {bins: 1, min: 0, max: 1}\n").is_err());
    }
}
