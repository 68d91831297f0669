use std::collections::BTreeMap;
use std::fs;
use std::process::ExitCode;

use assetline::cli::{Cli, Command};
use assetline::logging::init_logging;
use assetline::plugin::render_file;
use assetline::preset::DEFAULT_TASK;
use assetline::{Report, Runner};
use clap::Parser;
use console::style;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.global.log_level)?;

    let ctx = cli.global.context();
    let command = cli.command.unwrap_or(Command::Run {
        tasks: Vec::new(),
        watch: false,
        serve: false,
    });

    if let Command::Render {
        template,
        data,
        out,
    } = &command
    {
        let data: BTreeMap<_, _> = data.iter().cloned().collect();
        let rendered = render_file(template, &data)?;
        match out {
            Some(out) => fs::write(out, rendered)?,
            None => print!("{rendered}"),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let runner = match cli.global.preset().blueprint().and_then(|b| b.finish()) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            return Ok(ExitCode::FAILURE);
        }
    };

    match command {
        Command::Run {
            tasks,
            watch,
            serve,
        } => {
            let tasks = match tasks.is_empty() {
                true => vec![DEFAULT_TASK.to_string()],
                false => tasks,
            };

            let code = run(&runner, &ctx, &tasks);
            if watch {
                runner.watch(ctx, serve)?;
            }
            Ok(code)
        }
        Command::Watch { serve } => {
            runner.watch(ctx, serve)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            for task in runner.tasks() {
                let deps: Vec<_> = task.dependencies().collect();
                let body = task.body().map(ToString::to_string).unwrap_or_default();
                println!(
                    "{:<24} {:<10} {} {}",
                    style(task.id()).bold(),
                    task.mode().to_string(),
                    deps.join(", "),
                    style(body).dim()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Render { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn run(runner: &Runner, ctx: &assetline::RunContext, tasks: &[String]) -> ExitCode {
    match runner.run(ctx, tasks) {
        Ok(report) => summarize(&report),
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn summarize(report: &Report) -> ExitCode {
    eprintln!("{report}");

    let Err(e) = report.check() else {
        return ExitCode::SUCCESS;
    };

    for (name, msg) in report.failures() {
        eprintln!("{} task '{name}' failed: {msg}", style("error:").red().bold());
    }
    eprintln!("{} {e}", style("error:").red().bold());
    ExitCode::FAILURE
}
