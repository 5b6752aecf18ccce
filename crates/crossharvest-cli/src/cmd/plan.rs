//! Plan subcommand - show how a range splits into windows

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use crossharvest_core::fmt_num;
use crossharvest_crossref::{HarvestConfig, Harvester, SplitLeaf, WorksApi};

use super::WindowArgs;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub window: WindowArgs,
}

pub fn run(args: PlanArgs, config: &Config) -> Result<ExitCode> {
    let harvest_config = HarvestConfig::try_from(args.window.range_args(&config.harvest))
        .context("Invalid harvest settings")?;
    let client = super::connect(config, args.window.mailto.as_deref())?;
    let threshold = harvest_config.per_window_threshold;
    let harvester = Harvester::new(client, harvest_config);
    let plans = harvester.plan()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Window").fg(Color::Cyan),
            Cell::new("Mode").fg(Color::Cyan),
            Cell::new("Estimated").fg(Color::Cyan),
        ]);

    let mut probes = 0;
    let mut leaves = 0;
    let mut estimated = 0;
    let mut unknown = 0;
    for (_, plan) in &plans {
        probes += plan.probes;
        for leaf in &plan.leaves {
            leaves += 1;
            let w = leaf.window();
            let count = match w.estimated_total {
                Some(n) => {
                    estimated += n;
                    fmt_num(n)
                }
                None => {
                    unknown += 1;
                    "?".to_string()
                }
            };
            let mode = match leaf {
                SplitLeaf::Dense(_) => Cell::new(leaf.kind()).fg(Color::Yellow),
                SplitLeaf::Paginate(_) => Cell::new(leaf.kind()),
            };
            table.add_row(vec![Cell::new(w.to_string()), mode, Cell::new(count)]);
        }
    }

    eprintln!("\n{table}");
    eprintln!(
        "{} windows from {} batches ({} count probes), threshold {}, ~{} records{}, {} requests",
        leaves,
        plans.len(),
        probes,
        fmt_num(threshold),
        fmt_num(estimated),
        if unknown > 0 {
            format!(" ({unknown} windows unknown)")
        } else {
            String::new()
        },
        fmt_num(harvester.api().requests_issued()),
    );
    Ok(ExitCode::SUCCESS)
}
