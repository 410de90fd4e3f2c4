use polars::prelude::*;
use regex::Regex;
use std::ops::{BitAnd, BitOr};
use std::sync::LazyLock;

use crate::error::{YieldError, YieldResult};
use crate::util::event_table::EventTable;

static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<column>[A-Za-z_][\w.]*)\s*(?P<op>>=|<=|!=|==|>|<)\s*(?P<value>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)$",
    )
    .expect("condition pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Equal,
    NotEqual,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(Self::Greater),
            "<" => Some(Self::Less),
            ">=" => Some(Self::GreaterEqual),
            "<=" => Some(Self::LessEqual),
            "==" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            _ => None,
        }
    }

    fn compare(self, column: &Float64Chunked, literal: f64) -> BooleanChunked {
        match self {
            Self::Greater => column.gt(literal),
            Self::Less => column.lt(literal),
            Self::GreaterEqual => column.gt_eq(literal),
            Self::LessEqual => column.lt_eq(literal),
            Self::Equal => column.equal(literal),
            Self::NotEqual => column.not_equal(literal),
        }
    }
}

/// Column as a chunked array with NaN entries turned back into nulls.
fn column_chunk(events: &EventTable, name: &str) -> YieldResult<Float64Chunked> {
    Ok(events
        .column(name)?
        .iter()
        .map(|&value| (!value.is_nan()).then_some(value))
        .collect())
}

// A null (NaN in the table) fails every condition.
fn passed(mask: &BooleanChunked) -> BooleanChunked {
    mask.into_iter().map(|keep| keep == Some(true)).collect()
}

fn all_rows(events: &EventTable) -> BooleanChunked {
    BooleanChunked::full("".into(), true, events.height())
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Greater => ">",
            Self::Less => "<",
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        };
        write!(f, "{s}")
    }
}

// Struct to hold each parsed condition
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCondition {
    pub column_name: String,
    pub operator: Operator,
    pub literal_value: f64,
}

impl ParsedCondition {
    pub fn new(column_name: &str, operator: Operator, literal_value: f64) -> Self {
        Self {
            column_name: column_name.to_string(),
            operator,
            literal_value,
        }
    }
}

/// Conjunction of simple comparisons, e.g. `"(H.gtr.dp>-8) && (H.cer.npeSum>2.0)"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cut1D {
    pub name: String,
    pub expression: String,
    pub conditions: Vec<ParsedCondition>,
}

impl Cut1D {
    /// Parse an expression of `column op number` terms joined by `&` or `&&`.
    /// Parentheses are cosmetic and dropped.
    pub fn new(name: &str, expression: &str) -> YieldResult<Self> {
        let fail = |reason: String| YieldError::CutExpression {
            cut: name.to_string(),
            reason,
        };

        if expression.trim().is_empty() {
            return Err(fail("empty expression".to_string()));
        }
        if expression.contains("||") {
            return Err(fail(
                "'||' is not allowed inside a conjunction, build an any-of cut instead".to_string(),
            ));
        }

        let stripped: String = expression
            .chars()
            .filter(|c| *c != '(' && *c != ')')
            .collect();

        let mut conditions = Vec::new();
        for term in stripped.split('&') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let caps = CONDITION_RE
                .captures(term)
                .ok_or_else(|| fail(format!("cannot parse term '{term}'")))?;

            let operator = Operator::parse(&caps["op"])
                .ok_or_else(|| fail(format!("unknown operator in '{term}'")))?;
            let literal_value: f64 = caps["value"]
                .parse()
                .map_err(|e| fail(format!("invalid numeric literal in '{term}': {e}")))?;

            conditions.push(ParsedCondition {
                column_name: caps["column"].to_string(),
                operator,
                literal_value,
            });
        }

        if conditions.is_empty() {
            return Err(fail("no conditions found".to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            expression: expression.to_string(),
            conditions,
        })
    }

    /// Open interval cut `lo < column < hi`.
    pub fn range(name: &str, column: &str, lo: f64, hi: f64) -> Self {
        Self {
            name: name.to_string(),
            expression: format!("({column} > {lo} && {column} < {hi})"),
            conditions: vec![
                ParsedCondition::new(column, Operator::Greater, lo),
                ParsedCondition::new(column, Operator::Less, hi),
            ],
        }
    }

    pub fn required_columns(&self) -> Vec<String> {
        self.conditions
            .iter()
            .map(|cond| cond.column_name.clone())
            .collect()
    }

    pub fn boolean_mask(&self, events: &EventTable) -> YieldResult<BooleanChunked> {
        let mut masks = Vec::new();
        for condition in &self.conditions {
            let column = column_chunk(events, &condition.column_name)?;
            masks.push(passed(&condition.operator.compare(&column, condition.literal_value)));
        }

        // Combine all masks with a logical AND
        Ok(masks
            .into_iter()
            .reduce(|a, b| a.bitand(b))
            .unwrap_or_else(|| all_rows(events)))
    }
}

/// Disjunction of conjunctions; a row passes when any branch passes.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyOf {
    pub name: String,
    pub branches: Vec<Cut1D>,
}

impl AnyOf {
    pub fn boolean_mask(&self, events: &EventTable) -> YieldResult<BooleanChunked> {
        let mut mask = BooleanChunked::full("".into(), false, events.height());
        for branch in &self.branches {
            mask = mask.bitor(branch.boolean_mask(events)?);
        }
        Ok(mask)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cut {
    Cut1D(Cut1D),
    AnyOf(AnyOf),
}

impl Cut {
    pub fn new_1d(name: &str, expression: &str) -> YieldResult<Self> {
        Ok(Cut::Cut1D(Cut1D::new(name, expression)?))
    }

    pub fn any_of(name: &str, expressions: &[&str]) -> YieldResult<Self> {
        let branches = expressions
            .iter()
            .enumerate()
            .map(|(i, expr)| Cut1D::new(&format!("{name}[{i}]"), expr))
            .collect::<YieldResult<Vec<_>>>()?;
        Ok(Cut::AnyOf(AnyOf {
            name: name.to_string(),
            branches,
        }))
    }

    pub fn name(&self) -> &str {
        match self {
            Cut::Cut1D(cut1d) => &cut1d.name,
            Cut::AnyOf(any) => &any.name,
        }
    }

    /// Returns the column(s) required by the cut
    pub fn required_columns(&self) -> Vec<String> {
        match self {
            Cut::Cut1D(cut1d) => cut1d.required_columns(),
            Cut::AnyOf(any) => any
                .branches
                .iter()
                .flat_map(Cut1D::required_columns)
                .collect(),
        }
    }

    pub fn boolean_mask(&self, events: &EventTable) -> YieldResult<BooleanChunked> {
        match self {
            Cut::Cut1D(cut1d) => cut1d.boolean_mask(events),
            Cut::AnyOf(any) => any.boolean_mask(events),
        }
    }

    pub fn create_mask(&self, events: &EventTable) -> YieldResult<Vec<bool>> {
        Ok(self.boolean_mask(events)?.into_no_null_iter().collect())
    }
}

/// A selection: every cut must pass. No cuts selects every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cuts {
    pub cuts: Vec<Cut>,
}

impl Cuts {
    pub fn new(cuts: Vec<Cut>) -> Self {
        Self { cuts }
    }

    /// Build a selection from plain conjunction expressions, naming them by position.
    pub fn from_expressions(prefix: &str, expressions: &[String]) -> YieldResult<Self> {
        let cuts = expressions
            .iter()
            .enumerate()
            .map(|(i, expr)| Cut::new_1d(&format!("{prefix}_{i}"), expr))
            .collect::<YieldResult<Vec<_>>>()?;
        Ok(Self { cuts })
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    // Add a new cut
    pub fn add_cut(&mut self, cut: Cut) {
        if self.cuts.iter().any(|c| c.name() == cut.name()) {
            log::error!("Cut with name '{}' already exists.", cut.name());
        } else {
            self.cuts.push(cut);
        }
    }

    /// Logical AND of two selections, keeping the first cut of any duplicated name.
    pub fn and(&self, other: &Cuts) -> Cuts {
        let mut combined = self.clone();
        for cut in &other.cuts {
            if !combined.cuts.iter().any(|c| c.name() == cut.name()) {
                combined.cuts.push(cut.clone());
            }
        }
        combined
    }

    pub fn with(&self, cut: Cut) -> Cuts {
        self.and(&Cuts::new(vec![cut]))
    }

    pub fn required_columns(&self) -> Vec<String> {
        self.cuts
            .iter()
            .flat_map(|cut| cut.required_columns())
            .collect()
    }

    pub fn boolean_mask(&self, events: &EventTable) -> YieldResult<BooleanChunked> {
        let mut mask = all_rows(events);
        for cut in &self.cuts {
            mask = mask.bitand(cut.boolean_mask(events)?);
        }
        Ok(mask)
    }

    /// One flag per row of `events`.
    pub fn create_mask(&self, events: &EventTable) -> YieldResult<Vec<bool>> {
        Ok(self.boolean_mask(events)?.into_no_null_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> EventTable {
        EventTable::from_columns(vec![
            ("H.gtr.dp".to_string(), vec![-9.0, -2.0, 0.0, 7.9, f64::NAN]),
            ("H.cer.npeSum".to_string(), vec![5.0, 1.0, 3.0, 2.5, 4.0]),
            ("P.gtr.p".to_string(), vec![2.0, 3.0, 2.0, 3.0, 2.0]),
        ])
        .unwrap()
    }

    #[test]
    fn parses_root_style_conjunction() {
        let cut = Cut1D::new(
            "dnd",
            "((H.gtr.dp>-8.0) && (H.gtr.dp<8.0) && H.cal.etottracknorm>0.7 && H.cer.npeSum>2.0)",
        )
        .unwrap();
        assert_eq!(cut.conditions.len(), 4);
        assert_eq!(
            cut.conditions[0],
            ParsedCondition::new("H.gtr.dp", Operator::Greater, -8.0)
        );
        assert_eq!(cut.conditions[3].literal_value, 2.0);
        assert_eq!(
            cut.required_columns(),
            vec!["H.gtr.dp", "H.gtr.dp", "H.cal.etottracknorm", "H.cer.npeSum"]
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(Cut1D::new("a", "").is_err());
        assert!(Cut1D::new("a", "H.gtr.dp >> 3").is_err());
        assert!(Cut1D::new("a", "x > 1 || y < 2").is_err());
        assert!(Cut1D::new("a", "x > abc").is_err());
    }

    #[test]
    fn conjunction_mask_and_nan_rows() {
        let cuts = Cuts::new(vec![
            Cut::new_1d("dp", "H.gtr.dp > -8 && H.gtr.dp < 8").unwrap(),
            Cut::new_1d("cer", "H.cer.npeSum > 2.0").unwrap(),
        ]);
        let mask = cuts.create_mask(&events()).unwrap();
        assert_eq!(mask, vec![false, false, true, true, false]);
    }

    #[test]
    fn any_of_is_a_disjunction() {
        let pid = Cut::any_of("pid", &["P.gtr.p < 2.7 & H.cer.npeSum > 4", "P.gtr.p >= 2.7"])
            .unwrap();
        let mask = pid.create_mask(&events()).unwrap();
        assert_eq!(mask, vec![true, true, false, true, false]);
    }

    #[test]
    fn range_cut_is_open_on_both_sides() {
        let cut = Cut::Cut1D(Cut1D::range("gate", "H.gtr.dp", -2.0, 7.9));
        let mask = cut.create_mask(&events()).unwrap();
        assert_eq!(mask, vec![false, false, true, false, false]);
    }

    #[test]
    fn nan_rows_fail_every_operator() {
        let table = EventTable::from_columns(vec![("x".to_string(), vec![f64::NAN, 1.0])]).unwrap();
        for expr in ["x > 0", "x < 2", "x >= 1", "x <= 1", "x == 1", "x != 5"] {
            let cut = Cut::new_1d("x", expr).unwrap();
            assert_eq!(cut.create_mask(&table).unwrap(), vec![false, true], "{expr}");
        }
    }

    #[test]
    fn empty_selection_accepts_everything() {
        let mask = Cuts::default().create_mask(&events()).unwrap();
        assert!(mask.iter().all(|&keep| keep));
    }

    #[test]
    fn and_skips_duplicate_names() {
        let a = Cuts::new(vec![Cut::new_1d("dp", "H.gtr.dp > 0").unwrap()]);
        let b = Cuts::new(vec![
            Cut::new_1d("dp", "H.gtr.dp > 5").unwrap(),
            Cut::new_1d("cer", "H.cer.npeSum > 1").unwrap(),
        ]);
        let combined = a.and(&b);
        assert_eq!(combined.cuts.len(), 2);
        assert_eq!(combined.cuts[0], a.cuts[0]);
    }

    #[test]
    fn missing_column_propagates() {
        let cuts = Cuts::new(vec![Cut::new_1d("x", "nope > 1").unwrap()]);
        assert!(matches!(
            cuts.create_mask(&events()),
            Err(YieldError::MissingColumn(_))
        ));
    }
}
