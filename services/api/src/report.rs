use std::io::Write;
use std::path::PathBuf;

use card_rewards::error::AppError;
use card_rewards::rewards::{
    CardCatalogImport, CardId, IntakeIssue, OptimizationPlan, ScenarioResult, TransactionContext,
};
use chrono::{Local, NaiveDate};
use clap::Args;
use serde::Serialize;

use crate::infra::{import_catalog, service_for, MemoryRewardService};

#[derive(Args, Debug)]
pub(crate) struct CatalogArgs {
    /// Card catalog JSON export (array of card records or `{ "cards": [...] }`)
    #[arg(long)]
    pub(crate) catalog: PathBuf,
    /// Evaluation date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = card_rewards::rewards::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Optimize every dynamic card before evaluating
    #[arg(long)]
    pub(crate) activate: bool,
}

#[derive(Args, Debug)]
pub(crate) struct RankArgs {
    #[command(flatten)]
    pub(crate) catalog: CatalogArgs,
    /// Category id of the transaction
    #[arg(long)]
    pub(crate) category: Option<String>,
    /// Payee id of the transaction
    #[arg(long)]
    pub(crate) payee: Option<String>,
    /// Payment method id of the transaction
    #[arg(long)]
    pub(crate) payment_method: Option<String>,
    /// Transaction amount in milliunits (informational)
    #[arg(long, default_value_t = 0)]
    pub(crate) amount: u64,
    /// Also write the ranking to a CSV file
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ScenariosArgs {
    #[command(flatten)]
    pub(crate) catalog: CatalogArgs,
    /// Only print the best N scenarios
    #[arg(long)]
    pub(crate) limit: Option<usize>,
    /// Also write every scenario to a CSV file
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct OptimizeArgs {
    #[command(flatten)]
    pub(crate) catalog: CatalogArgs,
    /// Id of the dynamic card to plan
    #[arg(long)]
    pub(crate) card: String,
}

struct LoadedCatalog {
    service: MemoryRewardService,
    today: NaiveDate,
}

fn load(args: CatalogArgs) -> Result<LoadedCatalog, AppError> {
    let CatalogArgs {
        catalog,
        today,
        activate,
    } = args;

    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let import = import_catalog(&catalog)?;
    render_import(&catalog, &import);

    let service = service_for(import.cards);
    if activate {
        let outcomes = service.refresh_stale_selections(today)?;
        for outcome in outcomes.iter().filter(|outcome| !outcome.success) {
            println!(
                "Activation failed for {}: {}",
                outcome.card_id,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        println!("Activated {} dynamic card(s)", outcomes.len());
    }

    Ok(LoadedCatalog { service, today })
}

pub(crate) fn run_rank(args: RankArgs) -> Result<(), AppError> {
    let RankArgs {
        catalog,
        category,
        payee,
        payment_method,
        amount,
        csv,
    } = args;

    let LoadedCatalog { service, today } = load(catalog)?;
    let context = TransactionContext {
        category_id: category,
        payee_id: payee,
        payment_method_id: payment_method,
        amount_milliunits: amount,
    };

    let ranking = service.rank_cards_for_transaction(&context, today)?;
    render_ranking(&context, today, &ranking.results);

    if let Some(path) = csv {
        export_csv(&path, &ranking.results)?;
        println!("\nRanking written to {}", path.display());
    }
    Ok(())
}

pub(crate) fn run_scenarios(args: ScenariosArgs) -> Result<(), AppError> {
    let ScenariosArgs {
        catalog,
        limit,
        csv,
    } = args;

    let LoadedCatalog { service, today } = load(catalog)?;
    let scenarios = service.enumerate_all_scenarios(today)?;
    render_scenarios(today, &scenarios, limit);

    if let Some(path) = csv {
        export_csv(&path, &scenarios)?;
        println!("\n{} scenarios written to {}", scenarios.len(), path.display());
    }
    Ok(())
}

pub(crate) fn run_optimize(args: OptimizeArgs) -> Result<(), AppError> {
    let OptimizeArgs { catalog, card } = args;

    let LoadedCatalog { service, today } = load(catalog)?;
    let plan = service.try_optimize(&CardId(card), today)?;
    render_plan(&plan);
    Ok(())
}

fn render_import(path: &std::path::Path, import: &CardCatalogImport) {
    println!(
        "Card catalog: {} ({} cards)",
        path.display(),
        import.cards.len()
    );
    render_issues(&import.issues);
}

pub(crate) fn render_issues(issues: &[IntakeIssue]) {
    if issues.is_empty() {
        return;
    }
    println!("Intake issues");
    for issue in issues {
        println!("- {}", issue);
    }
}

/// Condition keys grouped per dimension, or `base rate` for an unconditional scenario.
pub(crate) fn describe_conditions(scenario: &ScenarioResult) -> String {
    if scenario.is_base() {
        return "base rate".to_string();
    }

    let mut parts = Vec::new();
    for (label, keys) in [
        ("category", &scenario.category),
        ("payee", &scenario.payee),
        ("payment method", &scenario.payment_method),
    ] {
        if !keys.is_empty() {
            parts.push(format!("{} {}", label, keys.join(", ")));
        }
    }
    parts.join(" | ")
}

fn card_label(scenario: &ScenarioResult) -> String {
    match &scenario.card.bank {
        Some(bank) => format!("{} ({})", scenario.card.name, bank),
        None => scenario.card.name.clone(),
    }
}

pub(crate) fn render_ranking(
    context: &TransactionContext,
    today: NaiveDate,
    results: &[ScenarioResult],
) {
    println!("\nBest card for transaction (evaluated {})", today);
    println!(
        "Category {} | Payee {} | Payment method {} | Amount {}",
        context.category_id.as_deref().unwrap_or("-"),
        context.payee_id.as_deref().unwrap_or("-"),
        context.payment_method_id.as_deref().unwrap_or("-"),
        context.amount_milliunits
    );

    if results.is_empty() {
        println!("No cards configured");
        return;
    }

    for (position, result) in results.iter().enumerate() {
        println!(
            "{:>2}. {:<32} {:>6.2}{}  {}",
            position + 1,
            card_label(result),
            result.rate,
            result.rate_type,
            describe_conditions(result)
        );
    }
}

pub(crate) fn render_scenarios(today: NaiveDate, scenarios: &[ScenarioResult], limit: Option<usize>) {
    println!("\nReachable reward scenarios (evaluated {})", today);
    if scenarios.is_empty() {
        println!("No scenarios: every card pays 0%");
        return;
    }

    let shown = limit.unwrap_or(scenarios.len()).min(scenarios.len());
    for scenario in &scenarios[..shown] {
        println!(
            "- {:>6.2}{} {:<32} {}",
            scenario.rate,
            scenario.rate_type,
            card_label(scenario),
            describe_conditions(scenario)
        );
    }
    if shown < scenarios.len() {
        println!("... {} more", scenarios.len() - shown);
    }
}

pub(crate) fn render_plan(plan: &OptimizationPlan) {
    println!("\nActivation plan for {} ({})", plan.card_id, plan.period);
    if plan.tiers.is_empty() {
        println!("No usable tiers");
        return;
    }

    for tier in &plan.tiers {
        println!(
            "\n{} ({} of {} slots used)",
            tier.tier_name,
            tier.selected.len(),
            tier.max_active
        );
        for scored in &tier.selected {
            println!(
                "  + {:<40} score {:>6.2} (tier {:.2} vs best elsewhere {:.2})",
                rule_label(&scored.rule),
                scored.score,
                scored.tier_rate,
                scored.best_competing_rate
            );
        }
        for scored in &tier.discarded {
            println!(
                "  - {:<40} score {:>6.2} (tier {:.2} vs best elsewhere {:.2})",
                rule_label(&scored.rule),
                scored.score,
                scored.tier_rate,
                scored.best_competing_rate
            );
        }
    }
}

fn rule_label(rule: &card_rewards::rewards::RewardRule) -> String {
    let mut parts = Vec::new();
    for keys in [&rule.category, &rule.payee, &rule.payment_method] {
        if !keys.is_empty() {
            parts.push(keys.keys().join(", "));
        }
    }
    if parts.is_empty() {
        "any transaction".to_string()
    } else {
        parts.join(" / ")
    }
}

#[derive(Debug, Serialize)]
struct ScenarioRow<'a> {
    card_id: &'a str,
    card_name: &'a str,
    bank: &'a str,
    rate: f64,
    #[serde(rename = "type")]
    rate_type: &'a str,
    category: String,
    payee: String,
    payment_method: String,
}

impl<'a> From<&'a ScenarioResult> for ScenarioRow<'a> {
    fn from(scenario: &'a ScenarioResult) -> Self {
        Self {
            card_id: &scenario.card.id.0,
            card_name: &scenario.card.name,
            bank: scenario.card.bank.as_deref().unwrap_or(""),
            rate: scenario.rate,
            rate_type: scenario.rate_type,
            category: scenario.category.join(";"),
            payee: scenario.payee.join(";"),
            payment_method: scenario.payment_method.join(";"),
        }
    }
}

pub(crate) fn write_scenarios_csv<W: Write>(
    writer: W,
    scenarios: &[ScenarioResult],
) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for scenario in scenarios {
        csv_writer.serialize(ScenarioRow::from(scenario))?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn export_csv(path: &std::path::Path, scenarios: &[ScenarioResult]) -> Result<(), AppError> {
    let file = std::fs::File::create(path)?;
    write_scenarios_csv(file, scenarios).map_err(|err| AppError::Io(err.into()))
}
