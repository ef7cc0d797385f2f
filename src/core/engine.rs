use super::types::{
    BucketId, ExpenseTier, IncomeTax, Mortgage, Projection, Property, ScenarioConfig, TaxTreatment,
    YearRow,
};

/// Balances below this are snapped to exact zero so later proportional
/// calculations never divide by near-zero dust.
const BALANCE_EPSILON: f64 = 0.01;

#[derive(Debug)]
struct Bucket {
    balance: f64,
    basis: f64,
    deferred: f64,
    growth_rate: f64,
    treatment: TaxTreatment,
}

impl Bucket {
    fn new(balance: f64, basis: f64, growth_rate: f64, treatment: TaxTreatment) -> Self {
        Self {
            balance,
            basis: basis.min(balance),
            deferred: match treatment {
                TaxTreatment::CapitalGains => (balance - basis.min(balance)).max(0.0),
                _ => 0.0,
            },
            growth_rate,
            treatment,
        }
    }

    /// Growth is credited to the balance before the year's cash flow is
    /// resolved. Positive growth accrues to the tax-deferred component;
    /// losses shrink it in proportion, never below zero.
    fn apply_growth(&mut self) {
        if self.balance <= 0.0 {
            return;
        }
        let gain = self.balance * self.growth_rate;
        self.balance = (self.balance + gain).max(0.0);
        if self.treatment == TaxTreatment::CapitalGains {
            if gain >= 0.0 {
                self.deferred += gain;
            } else {
                self.deferred = (self.deferred * (1.0 + self.growth_rate)).max(0.0);
            }
        }
        self.snap_if_dust();
    }

    /// Surplus contributions arrive as already-taxed principal.
    fn deposit(&mut self, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        self.balance += amount;
        self.basis += amount;
    }

    /// Withdraw enough gross to free `target_net` after tax, clamped to the
    /// available balance. Returns the net amount actually freed.
    fn withdraw_net(&mut self, target_net: f64, avg_tax_rate: f64, cap_gains_rate: f64) -> f64 {
        if target_net <= 0.0 || self.balance <= 0.0 {
            return 0.0;
        }

        let rate = match self.treatment {
            TaxTreatment::AlreadyTaxed => 0.0,
            TaxTreatment::OrdinaryIncome => avg_tax_rate,
            TaxTreatment::CapitalGains => (self.deferred / self.balance) * cap_gains_rate,
        };

        let gross = (target_net / (1.0 - rate)).min(self.balance);
        let fraction = gross / self.balance;
        let net = gross * (1.0 - rate);

        self.balance -= gross;
        self.basis -= self.basis * fraction;
        self.deferred -= self.deferred * fraction;
        self.snap_if_dust();

        net
    }

    fn snap_if_dust(&mut self) {
        if self.balance < BALANCE_EPSILON {
            self.balance = 0.0;
            self.basis = 0.0;
            self.deferred = 0.0;
        }
    }

    /// Balance as it would count toward net worth: fully tax-deferred
    /// retirement money is haircut at the average rate.
    fn liquidation_value(&self, avg_tax_rate: f64) -> f64 {
        match self.treatment {
            TaxTreatment::OrdinaryIncome => self.balance * (1.0 - avg_tax_rate),
            _ => self.balance,
        }
    }
}

#[derive(Debug)]
struct Buckets {
    cash: Bucket,
    brokerage: Bucket,
    retirement: Bucket,
    home_proceeds: Bucket,
}

impl Buckets {
    fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            cash: Bucket::new(
                config.cash_start,
                config.cash_start,
                config.cash_growth_rate,
                BucketId::Cash.tax_treatment(),
            ),
            brokerage: Bucket::new(
                config.brokerage_start,
                config.brokerage_cost_basis_start,
                config.brokerage_growth_rate,
                BucketId::Brokerage.tax_treatment(),
            ),
            retirement: Bucket::new(
                config.retirement_start,
                0.0,
                config.retirement_growth_rate,
                BucketId::Retirement.tax_treatment(),
            ),
            home_proceeds: Bucket::new(
                0.0,
                0.0,
                config.home_proceeds_growth_rate,
                BucketId::HomeProceeds.tax_treatment(),
            ),
        }
    }

    fn get_mut(&mut self, id: BucketId) -> &mut Bucket {
        match id {
            BucketId::Cash => &mut self.cash,
            BucketId::Brokerage => &mut self.brokerage,
            BucketId::Retirement => &mut self.retirement,
            BucketId::HomeProceeds => &mut self.home_proceeds,
        }
    }

    fn apply_growth(&mut self) {
        for id in BucketId::ALL {
            self.get_mut(id).apply_growth();
        }
    }

    fn liquidation_total(&self, avg_tax_rate: f64) -> f64 {
        self.cash.liquidation_value(avg_tax_rate)
            + self.brokerage.liquidation_value(avg_tax_rate)
            + self.retirement.liquidation_value(avg_tax_rate)
            + self.home_proceeds.liquidation_value(avg_tax_rate)
    }
}

#[derive(Debug)]
struct PropertyState {
    value: f64,
    mortgage_balance: f64,
    term_months_left: u32,
    monthly_payment: f64,
    monthly_rate: f64,
    sold: bool,
}

impl PropertyState {
    fn new(property: &Property) -> Self {
        let (mortgage_balance, term_months_left, monthly_payment, monthly_rate) =
            match property.mortgage {
                Some(m) if m.balance > 0.0 && m.term_years > 0 => {
                    let months = m.term_years * 12;
                    (m.balance, months, monthly_payment(&m), m.annual_rate / 12.0)
                }
                _ => (0.0, 0, 0.0, 0.0),
            };

        Self {
            value: property.value,
            mortgage_balance,
            term_months_left,
            monthly_payment,
            monthly_rate,
            sold: false,
        }
    }

    /// Run twelve months of amortization. Interest is derived from the
    /// current remaining balance each month and principal is capped so it
    /// never overshoots. Returns (amount paid, interest portion).
    fn service_mortgage(&mut self) -> (f64, f64) {
        if self.mortgage_balance <= 0.0 || self.term_months_left == 0 {
            return (0.0, 0.0);
        }

        let mut paid = 0.0;
        let mut interest_total = 0.0;

        for _ in 0..12 {
            if self.mortgage_balance <= 0.0 {
                break;
            }
            let interest = self.mortgage_balance * self.monthly_rate;
            let principal = (self.monthly_payment - interest)
                .max(0.0)
                .min(self.mortgage_balance);
            self.mortgage_balance -= principal;
            interest_total += interest;
            paid += interest + principal;
        }

        self.term_months_left = self.term_months_left.saturating_sub(12);
        if self.mortgage_balance <= BALANCE_EPSILON || self.term_months_left == 0 {
            self.mortgage_balance = 0.0;
            self.term_months_left = 0;
        }

        (paid, interest_total)
    }

    /// Settle the scheduled sale: realize the appreciated price, deduct the
    /// selling cost, capital-gains tax, and mortgage payoff, and retire the
    /// property permanently. Proceeds are floored at zero.
    fn settle_sale(&mut self, property: &Property) -> f64 {
        let proceeds = liquid_value(self.value, self.mortgage_balance, property);
        self.value = 0.0;
        self.mortgage_balance = 0.0;
        self.term_months_left = 0;
        self.sold = true;
        proceeds
    }
}

/// Net cash realizable today: price minus sale cost, capital-gains tax, and
/// mortgage payoff, never negative. Zero once sold.
fn liquid_value(value: f64, mortgage_balance: f64, property: &Property) -> f64 {
    if value <= 0.0 {
        return 0.0;
    }
    let sale_cost = value * property.sale_cost_pct;
    let taxable_gain =
        (value - sale_cost - property.cost_basis - property.improvements - property.exclusion)
            .max(0.0);
    let tax = taxable_gain * property.cap_gains_rate;
    (value - sale_cost - tax - mortgage_balance).max(0.0)
}

/// Standard amortizing payment, with the zero-rate case falling back to a
/// straight-line split of the principal.
fn monthly_payment(mortgage: &Mortgage) -> f64 {
    let months = (mortgage.term_years * 12) as f64;
    let monthly_rate = mortgage.annual_rate / 12.0;
    if monthly_rate.abs() < 1e-12 {
        mortgage.balance / months
    } else {
        mortgage.balance * monthly_rate / (1.0 - (1.0 + monthly_rate).powf(-months))
    }
}

/// The active tier is picked by cumulative duration boundaries from
/// `start_age`; once past every boundary, the last tier persists.
fn active_tier(config: &ScenarioConfig, age: u32) -> Option<&ExpenseTier> {
    let mut boundary = config.start_age;
    for tier in &config.expense_tiers {
        boundary = boundary.saturating_add(tier.duration_years);
        if age < boundary {
            return Some(tier);
        }
    }
    config.expense_tiers.last()
}

fn tier_cost(tier: &ExpenseTier, years_elapsed: u32) -> f64 {
    tier.annual_cost * (1.0 + tier.inflation_rate).powi(years_elapsed as i32)
}

fn stream_active(start_age: Option<u32>, end_age: Option<u32>, age: u32) -> bool {
    start_age.is_none_or(|a| age >= a) && end_age.is_none_or(|a| age <= a)
}

fn net_income(config: &ScenarioConfig, age: u32) -> f64 {
    config
        .income_streams
        .iter()
        .filter(|s| stream_active(s.start_age, s.end_age, age))
        .map(|s| match s.tax {
            IncomeTax::Exempt => s.annual_gross,
            IncomeTax::AverageRate => s.annual_gross * (1.0 - config.avg_tax_rate),
        })
        .sum()
}

/// Visit buckets in the configured priority order until the deficit is
/// covered or everything is exhausted. Returns the net amount freed; any
/// residual lands on the debt facility when one is configured, and is
/// otherwise discarded — insolvency never aborts a run.
fn resolve_deficit(
    deficit: f64,
    config: &ScenarioConfig,
    buckets: &mut Buckets,
    debt_balance: &mut f64,
) -> f64 {
    let mut remaining = deficit;
    let mut freed_total = 0.0;

    for id in &config.withdrawal_order {
        if remaining <= 0.0 {
            break;
        }
        let freed =
            buckets
                .get_mut(*id)
                .withdraw_net(remaining, config.avg_tax_rate, config.cap_gains_rate);
        freed_total += freed;
        remaining -= freed;
    }

    if remaining > BALANCE_EPSILON && config.debt.is_some() {
        *debt_balance += remaining;
    }

    freed_total
}

/// Run one deterministic age-by-age projection. The config must already be
/// validated by the input layer; the engine does no defensive checks.
pub fn run_projection(config: &ScenarioConfig) -> Projection {
    let mut buckets = Buckets::from_config(config);
    let mut properties: Vec<PropertyState> =
        config.properties.iter().map(PropertyState::new).collect();
    let mut debt_balance = config.debt.map(|d| d.start_balance).unwrap_or(0.0);

    let year_count = (config.end_age.saturating_sub(config.start_age) + 1) as usize;
    let mut rows = Vec::with_capacity(year_count);

    for (years_elapsed, age) in (config.start_age..=config.end_age).enumerate() {
        // 1. Debt interest compounds the balance and must be re-funded.
        let debt_interest = match config.debt {
            Some(debt) if debt_balance > 0.0 => {
                let interest = debt_balance * debt.rate;
                debt_balance += interest;
                interest
            }
            _ => 0.0,
        };
        let mut expenses = debt_interest;

        // 2. Unsold properties appreciate.
        for (state, property) in properties.iter_mut().zip(&config.properties) {
            if !state.sold {
                state.value *= 1.0 + property.appreciation_rate;
            }
        }

        // 3. Inflated cost of the active expense tier.
        let (tier_label, base_cost) = match active_tier(config, age) {
            Some(tier) => (tier.label.clone(), tier_cost(tier, years_elapsed as u32)),
            None => (String::new(), 0.0),
        };
        expenses += base_cost;

        for (state, property) in properties.iter().zip(&config.properties) {
            if !state.sold {
                expenses += property.annual_carrying_cost;
            }
        }

        // 4. Mortgage service plus the interest tax shield.
        let mut mortgage_payment_total = 0.0;
        let mut mortgage_shield_total = 0.0;
        for state in properties.iter_mut() {
            if state.sold {
                continue;
            }
            let (paid, interest) = state.service_mortgage();
            let shield = interest * (1.0 - config.avg_tax_rate);
            expenses += paid - shield;
            mortgage_payment_total += paid;
            mortgage_shield_total += shield;
        }

        // 5. Growth lands on balances before cash flow is resolved.
        buckets.apply_growth();

        // 6. Scheduled one-time sales.
        let mut sale_proceeds_total = 0.0;
        for (state, property) in properties.iter_mut().zip(&config.properties) {
            if !state.sold && property.sale_offset == Some(years_elapsed as u32) {
                let proceeds = state.settle_sale(property);
                buckets.get_mut(config.sale_proceeds_bucket).deposit(proceeds);
                sale_proceeds_total += proceeds;
            }
        }

        // 7–8. Income, then surplus contribution or withdrawal cascade.
        let income_net = net_income(config, age);
        let cash_flow = income_net - expenses;
        let mut withdrawn_net = 0.0;
        if cash_flow >= 0.0 {
            buckets.get_mut(config.surplus_bucket).deposit(cash_flow);
        } else {
            withdrawn_net = resolve_deficit(-cash_flow, config, &mut buckets, &mut debt_balance);
        }

        // 9. Net worth: haircut buckets, liquid property values, minus debt.
        let property_liquid_values: Vec<f64> = properties
            .iter()
            .zip(&config.properties)
            .map(|(state, property)| liquid_value(state.value, state.mortgage_balance, property))
            .collect();
        let net_worth = buckets.liquidation_total(config.avg_tax_rate)
            + property_liquid_values.iter().sum::<f64>()
            - debt_balance;

        rows.push(YearRow {
            age,
            tier: tier_label,
            net_worth,
            income_net,
            expenses_total: expenses,
            cash_flow,
            cash_balance: buckets.cash.balance,
            brokerage_balance: buckets.brokerage.balance,
            retirement_balance: buckets.retirement.balance,
            home_proceeds_balance: buckets.home_proceeds.balance,
            property_values: properties.iter().map(|p| p.value).collect(),
            property_liquid_values,
            mortgage_balances: properties.iter().map(|p| p.mortgage_balance).collect(),
            debt_balance,
            debt_interest,
            mortgage_payment: mortgage_payment_total,
            mortgage_tax_shield: mortgage_shield_total,
            withdrawn_net,
            sale_proceeds: sale_proceeds_total,
        });
    }

    Projection { rows }
}
