//! Free-text scenario import: paste rows of "name: value" pairs copied from a
//! spreadsheet or advisor worksheet and fuzzy-match the parameter names.
//! Deliberately lenient — unrecognized lines are skipped and counted, never
//! fatal. Rates are expected in percent, matching the CLI conventions.

/// Scalar parameters the importer knows how to map. Each corresponds to one
/// field of the input layer's default scenario.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImportField {
    StartAge,
    EndAge,
    AvgTaxRate,
    CapGainsRate,
    CashStart,
    CashGrowth,
    BrokerageStart,
    BrokerageBasisStart,
    BrokerageGrowth,
    RetirementStart,
    RetirementGrowth,
    IncomeAnnual,
    IncomeEndAge,
    ExpenseAnnual,
    ExpenseInflation,
    HomeValue,
    HomeAppreciation,
    HomeBasis,
    HomeImprovements,
    HomeExclusion,
    HomeSaleCostPct,
    HomeCapGainsRate,
    HomeSaleAge,
    HomeCarryingCost,
    MortgageBalance,
    MortgageRate,
    MortgageTermYears,
    DebtStart,
    DebtRate,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ImportedValue {
    pub field: ImportField,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub values: Vec<ImportedValue>,
    pub matched: usize,
    pub skipped: usize,
}

const ALIASES: &[(&[&str], ImportField)] = &[
    (&["startage", "currentage", "age"], ImportField::StartAge),
    (&["endage", "horizonage", "planto"], ImportField::EndAge),
    (
        &["avgtaxrate", "averagetaxrate", "incometaxrate", "taxrate"],
        ImportField::AvgTaxRate,
    ),
    (
        &["capgainsrate", "capitalgainsrate", "capitalgainstax"],
        ImportField::CapGainsRate,
    ),
    (
        &["cashstart", "cash", "liquidcash", "savings"],
        ImportField::CashStart,
    ),
    (&["cashgrowth", "cashrate"], ImportField::CashGrowth),
    (
        &["brokeragestart", "brokerage", "investments", "taxablestart"],
        ImportField::BrokerageStart,
    ),
    (
        &["brokeragebasis", "costbasis", "taxablebasis"],
        ImportField::BrokerageBasisStart,
    ),
    (
        &["brokeragegrowth", "investmentgrowth", "growth"],
        ImportField::BrokerageGrowth,
    ),
    (
        &["retirementstart", "retirement", "ira", "k401", "pension"],
        ImportField::RetirementStart,
    ),
    (
        &["retirementgrowth", "iragrowth"],
        ImportField::RetirementGrowth,
    ),
    (
        &["incomeannual", "annualincome", "income", "salary"],
        ImportField::IncomeAnnual,
    ),
    (
        &["incomeendage", "retireage", "retirementage"],
        ImportField::IncomeEndAge,
    ),
    (
        &["expenseannual", "annualexpenses", "expenses", "spending"],
        ImportField::ExpenseAnnual,
    ),
    (
        &["expenseinflation", "inflation"],
        ImportField::ExpenseInflation,
    ),
    (&["homevalue", "home", "housevalue"], ImportField::HomeValue),
    (
        &["homeappreciation", "appreciation"],
        ImportField::HomeAppreciation,
    ),
    (&["homebasis", "homecostbasis"], ImportField::HomeBasis),
    (
        &["homeimprovements", "improvements"],
        ImportField::HomeImprovements,
    ),
    (
        &["homeexclusion", "gainexclusion", "exclusion"],
        ImportField::HomeExclusion,
    ),
    (
        &["homesalecost", "salecost", "sellingcost"],
        ImportField::HomeSaleCostPct,
    ),
    (&["homecapgains"], ImportField::HomeCapGainsRate),
    (
        &["homesaleage", "sellhomeage", "agetosellhome"],
        ImportField::HomeSaleAge,
    ),
    (
        &["homecarryingcost", "carryingcost", "hoa", "propertytax"],
        ImportField::HomeCarryingCost,
    ),
    (&["mortgagebalance", "mortgage"], ImportField::MortgageBalance),
    (&["mortgagerate"], ImportField::MortgageRate),
    (
        &["mortgageterm", "mortgagetermyears", "mortgageyears"],
        ImportField::MortgageTermYears,
    ),
    (&["debtstart", "debt"], ImportField::DebtStart),
    (
        &["debtrate", "debtinterestrate", "borrowingrate"],
        ImportField::DebtRate,
    ),
];

/// Parse pasted key/value rows. Each non-empty line is split on the first
/// `:`, `=`, or tab; the name is matched against the alias table (exact
/// normalized match first, then substring containment). Lines that fail to
/// match or whose value does not parse are skipped.
pub fn parse_scenario_text(text: &str) -> ImportReport {
    let mut values = Vec::new();
    let mut skipped = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, raw_value)) = split_line(line) else {
            skipped += 1;
            continue;
        };

        let Some(field) = match_field(&normalize(name)) else {
            skipped += 1;
            continue;
        };

        let Some(value) = parse_amount(raw_value) else {
            skipped += 1;
            continue;
        };

        values.push(ImportedValue { field, value });
    }

    ImportReport {
        matched: values.len(),
        skipped,
        values,
    }
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    for sep in [':', '=', '\t'] {
        if let Some((name, value)) = line.split_once(sep) {
            return Some((name.trim(), value.trim()));
        }
    }
    // Fall back to the last whitespace run: "Annual Expenses 65000".
    let idx = line.rfind(char::is_whitespace)?;
    let (name, value) = line.split_at(idx);
    Some((name.trim(), value.trim()))
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn match_field(normalized: &str) -> Option<ImportField> {
    if normalized.is_empty() {
        return None;
    }

    for (aliases, field) in ALIASES {
        if aliases.iter().any(|a| *a == normalized) {
            return Some(*field);
        }
    }

    // Fuzzy pass: the pasted name contains a known alias or vice versa.
    // Longer aliases first so "mortgagebalance" beats "mortgage".
    let mut best: Option<(usize, ImportField)> = None;
    for (aliases, field) in ALIASES {
        for alias in *aliases {
            if alias.len() < 4 {
                continue;
            }
            if normalized.contains(alias) || alias.contains(normalized) {
                let score = alias.len().min(normalized.len());
                if best.is_none_or(|(s, _)| score > s) {
                    best = Some((score, *field));
                }
            }
        }
    }
    best.map(|(_, field)| field)
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%' | ' ') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_exact_and_aliased_names() {
        let report = parse_scenario_text(
            "Current Age: 68\nAnnual Expenses: $65,000\nInvestments = 600000\nhome value\t700000",
        );
        assert_eq!(report.matched, 4);
        assert_eq!(report.skipped, 0);
        assert_eq!(
            report.values[0],
            ImportedValue {
                field: ImportField::StartAge,
                value: 68.0
            }
        );
        assert_eq!(report.values[1].field, ImportField::ExpenseAnnual);
        assert_eq!(report.values[1].value, 65_000.0);
        assert_eq!(report.values[2].field, ImportField::BrokerageStart);
        assert_eq!(report.values[3].field, ImportField::HomeValue);
    }

    #[test]
    fn fuzzy_matches_prefer_the_longest_alias() {
        let report = parse_scenario_text("Outstanding mortgage balance: 120000");
        assert_eq!(report.values[0].field, ImportField::MortgageBalance);
    }

    #[test]
    fn maps_home_improvements_and_gain_exclusion() {
        let report =
            parse_scenario_text("Home improvements: $30,000\nGain exclusion: 250000");
        assert_eq!(report.matched, 2);
        assert_eq!(report.values[0].field, ImportField::HomeImprovements);
        assert_eq!(report.values[0].value, 30_000.0);
        assert_eq!(report.values[1].field, ImportField::HomeExclusion);
        assert_eq!(report.values[1].value, 250_000.0);
    }

    #[test]
    fn skips_unrecognized_lines_and_counts_them() {
        let report =
            parse_scenario_text("favourite colour: blue\nincome: 20000\ngibberish line here");
        assert_eq!(report.matched, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.values[0].field, ImportField::IncomeAnnual);
    }

    #[test]
    fn strips_currency_and_percent_decorations() {
        let report = parse_scenario_text("growth: 5.5%\ncash: $1,250,000");
        assert_eq!(report.values[0].value, 5.5);
        assert_eq!(report.values[1].value, 1_250_000.0);
    }

    #[test]
    fn last_whitespace_fallback_splits_name_from_value() {
        let report = parse_scenario_text("age to sell home 80");
        assert_eq!(report.matched, 1);
        assert_eq!(report.values[0].field, ImportField::HomeSaleAge);
        assert_eq!(report.values[0].value, 80.0);
    }

    #[test]
    fn blank_and_comment_lines_are_ignored_silently() {
        let report = parse_scenario_text("\n# header row\n\nincome: 1000\n");
        assert_eq!(report.matched, 1);
        assert_eq!(report.skipped, 0);
    }
}
