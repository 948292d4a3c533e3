//! Terminal and JSON rendering of pipeline results.

use crate::backtest::RegimePerformance;
use crate::error::Result;
use crate::pipeline::PipelineResult;
use crate::risk::StressResult;
use crate::types::{Regime, Signal, SignalAction};
use colored::Colorize;
use tabled::{builder::Builder, settings::Style};

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a full run report to stdout.
    pub fn print_report(result: &PipelineResult) {
        let bt = &result.backtest.metrics;
        let risk = &result.risk.metrics;

        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " REGIME ALLOCATION RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Market:          {}", result.market);
        println!("  Assets:          {}", result.prices.tickers().join(", "));
        if let (Some(first), Some(last)) = (result.prices.dates().first(), result.prices.dates().last()) {
            println!("  Period:          {} to {}", first, last);
        }
        println!("  Trading Days:    {}", result.prices.len());
        println!("  Run Id:          {}", result.metadata.run_id);
        if result.synthetic_data {
            println!("  {}", "Synthetic prices substituted for missing data".yellow());
        }
        println!(
            "  Current Regime:  {}{}",
            Self::regime_colored(result.current_regime),
            if result.regime_from_cache { " (cached model)" } else { "" }
        );
        println!();

        println!("{}", "Performance".bold().underline());
        println!(
            "  Final Equity:    ${:>14.2}  {}",
            result.backtest.final_equity(),
            Self::format_pct_change(bt.total_return * 100.0)
        );
        println!("  CAGR:            {:>14.2}%", bt.cagr * 100.0);
        println!("  Volatility:      {:>14.2}%", bt.volatility * 100.0);
        println!("  Sharpe Ratio:    {:>14.2}", bt.sharpe);
        println!("  Sortino Ratio:   {:>14.2}", bt.sortino);
        println!("  Max Drawdown:    {:>14.2}%", bt.max_drawdown * 100.0);
        println!("  Avg Turnover:    {:>14.4}", bt.turnover);
        println!("  Costs:           {:>14.4}%", bt.costs_pct * 100.0);
        println!();

        println!(
            "{}",
            format!("Forward Risk ({} paths)", risk.n_paths).bold().underline()
        );
        println!("  VaR 95:          {:>14.2}%", risk.var_95 * 100.0);
        println!("  CVaR 95:         {:>14.2}%", risk.cvar_95 * 100.0);
        println!("  P(ruin):         {:>14.2}%", risk.prob_ruin * 100.0);
        println!("  P(max DD ruin):  {:>14.2}%", risk.max_dd_prob * 100.0);
        println!("  Sim. Return:     {:>14.2}%", risk.mean_return * 100.0);
        println!("  Sim. Volatility: {:>14.2}%", risk.volatility * 100.0);
        println!("  Sharpe:          {:>14.2}", risk.sharpe);
        println!("  Calmar:          {:>14.2}", risk.calmar);
        println!();

        println!("{}", "Regime Performance".bold().underline());
        println!("{}", Self::regime_table(&result.backtest.regime_performance));
        println!();

        println!("{}", "Stress Tests".bold().underline());
        println!("{}", Self::stress_table(&result.risk.stress));
        println!();

        println!("{}", "Signals".bold().underline());
        println!("{}", Self::signal_table(&result.signals));
        println!();

        println!("{}", "═".repeat(60).blue());
    }

    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    fn regime_colored(regime: Regime) -> String {
        match regime {
            Regime::Bull => regime.label().green().to_string(),
            Regime::Bear => regime.label().red().to_string(),
            Regime::HighVol => regime.label().yellow().to_string(),
            Regime::Crisis => regime.label().red().bold().to_string(),
        }
    }

    fn action_colored(action: SignalAction) -> String {
        match action {
            SignalAction::Buy => action.to_string().green().to_string(),
            SignalAction::Hold => action.to_string(),
            SignalAction::Sell => action.to_string().red().to_string(),
        }
    }

    pub fn signal_table(signals: &[Signal]) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Ticker", "Action", "Weight %", "Momentum %", "P(up)", "Rationale"]);
        for s in signals {
            builder.push_record([
                s.ticker.clone(),
                Self::action_colored(s.action),
                format!("{:.2}", s.weight * 100.0),
                format!("{:+.2}", s.momentum * 100.0),
                s.buy_probability
                    .map(|p| format!("{:.2}", p))
                    .unwrap_or_else(|| "-".to_string()),
                match &s.explanation {
                    Some(e) => format!("{} ({})", s.rationale, e),
                    None => s.rationale.clone(),
                },
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    pub fn stress_table(results: &[StressResult]) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Scenario", "Return %", "Vol %", "VaR 95 %", "CVaR 95 %", "Avg Max DD %", "P(ruin) %",
        ]);
        for r in results {
            builder.push_record([
                r.scenario.name.clone(),
                format!("{:.2}", r.expected_return * 100.0),
                format!("{:.2}", r.volatility * 100.0),
                format!("{:.2}", r.var_95 * 100.0),
                format!("{:.2}", r.cvar_95 * 100.0),
                format!("{:.2}", r.avg_max_drawdown * 100.0),
                format!("{:.2}", r.prob_ruin * 100.0),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    pub fn regime_table(performance: &[RegimePerformance]) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Regime", "Days", "Sharpe", "Mean Daily %"]);
        for p in performance {
            builder.push_record([
                p.label.clone(),
                p.days.to_string(),
                format!("{:.2}", p.sharpe),
                format!("{:.4}", p.mean_return * 100.0),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    pub fn to_json(result: &PipelineResult) -> Result<String> {
        Ok(serde_json::to_string_pretty(result)?)
    }
}
