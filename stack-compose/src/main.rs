use anyhow::{anyhow, Result};
use crossterm::{
    cursor,
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::info;
use serde::Serialize;
use std::{
    env,
    io::{stdout, Write},
    path::PathBuf,
};
use structopt::StructOpt;

use backends::{DockerPublisher, KubectlApplier};
use config::{find_config_file, Config, Overrides};
use controller::{Controller, PublishOperation};
use models::{BuildPlan, BuildPolicy, ServiceName};
use resolver::Resolution;

mod backends;
mod config;
mod controller;
mod error;
mod hasher;
mod labels;
mod manifests;
mod models;
mod reference;
mod resolver;
mod services;
mod templates;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "stack-compose",
    about = "Builds, publishes and deploys every service under a services directory."
)]
struct Opt {
    /// Config file to use instead of searching for stack-compose.yml.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Namespace to deploy into.
    #[structopt(long)]
    namespace: Option<String>,

    /// Version used for services that do not declare one.
    #[structopt(long, env = "VERSION")]
    default_version: Option<String>,

    #[structopt(long)]
    org: Option<String>,

    #[structopt(long)]
    registry: Option<String>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Resolves every service and prints the image it would build.
    Plan {
        #[structopt(long)]
        json: bool,
    },
    /// Builds and pushes the image of every service.
    Build {
        #[structopt(long)]
        /// Rebuild images even if the tag already exists.
        always: bool,
    },
    /// Prints the Kubernetes manifests without building anything.
    Manifests,
    /// Builds, pushes and deploys every service.
    Up {
        #[structopt(long)]
        /// Rebuild images even if the tag already exists.
        always: bool,
    },
}

fn load_config(opt: &Opt) -> Result<Config> {
    let current_dir = env::current_dir()?;

    let config = match &opt.config {
        Some(path) => Config::from_file(path)?,
        None => match find_config_file(&current_dir) {
            Some(path) => {
                info!("found config file {:?}", path);
                Config::from_file(&path)?
            }
            None => {
                info!("no config file found, using defaults");
                Config::defaults(&current_dir)
            }
        },
    };

    Ok(config.with_overrides(Overrides {
        registry_host: opt.registry.clone(),
        org: opt.org.clone(),
        version: opt.default_version.clone(),
        namespace: opt.namespace.clone(),
    }))
}

fn main() -> Result<()> {
    pretty_env_logger::init_custom_env("LOG");

    let opt = Opt::from_args();
    let mut stdout = stdout();

    let config = load_config(&opt)?;
    info!("services root {:?}", config.services_root);

    let applier = KubectlApplier::new(config.kubeconfig.clone());
    let mut controller = Controller::init(config, DockerPublisher::new(), applier)?;
    info!("created controller");

    let resolutions = controller.resolve()?;
    let total = resolutions.len();

    let failed = match opt.command {
        Command::Plan { json: true } => {
            print_plan_json(&mut stdout, &resolutions)?;
            resolutions.iter().filter(|r| r.outcome.is_err()).count()
        }
        Command::Plan { json: false } => {
            let (plans, failed) = split_resolutions(&mut stdout, resolutions)?;
            print_plans(&mut stdout, &plans)?;
            failed
        }
        Command::Manifests => {
            let (plans, failed) = split_resolutions(&mut std::io::stderr(), resolutions)?;
            let descriptors = controller.descriptors(&plans);
            stdout.write_all(controller.render(&descriptors)?.as_bytes())?;
            stdout.flush()?;
            failed
        }
        Command::Build { always } => {
            let (plans, failed) = split_resolutions(&mut stdout, resolutions)?;
            let (_, publish_failed) = publish(&mut controller, &mut stdout, plans, always)?;
            failed + publish_failed
        }
        Command::Up { always } => {
            let (plans, failed) = split_resolutions(&mut stdout, resolutions)?;
            let (published, publish_failed) = publish(&mut controller, &mut stdout, plans, always)?;

            if !published.is_empty() {
                let descriptors = controller.descriptors(&published);
                controller.deploy(&descriptors)?;
                stdout
                    .queue(style::PrintStyledContent("INFO: ".cyan().bold()))?
                    .queue(style::Print(format!(
                        "deployed {} services to namespace {}.\n",
                        descriptors.len(),
                        controller.namespace()
                    )))?
                    .flush()?;
            }

            failed + publish_failed
        }
    };

    if failed > 0 {
        return Err(anyhow!("{} of {} services failed", failed, total));
    }

    Ok(())
}

/// Prints an error line for every unresolved service and returns the plans
/// of the others, with the number of failures.
fn split_resolutions(
    out: &mut impl Write,
    resolutions: Vec<Resolution>,
) -> Result<(Vec<BuildPlan>, usize)> {
    let mut plans = Vec::new();
    let mut failed = 0;

    for resolution in resolutions {
        match resolution.outcome {
            Ok(plan) => plans.push(plan),
            Err(err) => {
                failed += 1;
                print_error(out, &err)?;
            }
        }
    }

    Ok((plans, failed))
}

fn print_error(out: &mut impl Write, err: &dyn std::fmt::Display) -> Result<()> {
    out.queue(style::PrintStyledContent("ERROR: ".red().bold()))?
        .queue(style::Print(format!("{}\n", err)))?
        .flush()?;

    Ok(())
}

fn print_plans(stdout: &mut impl Write, plans: &[BuildPlan]) -> Result<()> {
    let longest_name = plans.iter().map(|plan| plan.service.0.len()).max().unwrap_or(0);

    for plan in plans {
        let padding = longest_name - plan.service.0.len() + 1;
        stdout
            .queue(style::PrintStyledContent(style::style(plan.service.0.as_str()).bold()))?
            .queue(cursor::MoveRight(padding as u16))?
            .queue(style::Print(format!(
                "{} ({})\n",
                plan.image_tag, plan.dockerfile
            )))?;
    }

    stdout.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct PlanReport<'a> {
    service: &'a ServiceName,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<&'a BuildPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_plan_json(stdout: &mut impl Write, resolutions: &[Resolution]) -> Result<()> {
    let reports = resolutions
        .iter()
        .map(|resolution| PlanReport {
            service: &resolution.service,
            plan: resolution.outcome.as_ref().ok(),
            error: resolution.outcome.as_ref().err().map(|err| err.to_string()),
        })
        .collect::<Vec<_>>();

    serde_json::to_writer_pretty(&mut *stdout, &reports)?;
    writeln!(stdout)?;

    Ok(())
}

/// Builds and pushes what needs it, one service at a time, and returns the
/// plans whose images are now in the registry with the number of failures.
fn publish(
    controller: &mut Controller,
    stdout: &mut impl Write,
    plans: Vec<BuildPlan>,
    always: bool,
) -> Result<(Vec<BuildPlan>, usize)> {
    fn operation_verb(operation: PublishOperation) -> &'static str {
        match operation {
            PublishOperation::Build => "Publishing",
            PublishOperation::Reuse => "Reusing",
        }
    }

    let policy = if always {
        BuildPolicy::Always
    } else {
        BuildPolicy::IfMissing
    };
    let operations = controller.publish_diff(plans, policy)?;

    let lines = operations
        .iter()
        .map(|(plan, operation)| format!("{} {}", operation_verb(*operation), plan.image_tag))
        .collect::<Vec<_>>();

    let longest_line = lines.iter().map(|line| line.len()).max().unwrap_or(0);

    for line in lines.iter() {
        stdout.queue(style::Print(line))?;

        let padding = longest_line - line.len() + 1;
        stdout
            .queue(cursor::MoveRight(padding as u16))?
            .queue(style::Print("...\n"))?;
    }

    stdout.flush()?;

    let mut published = Vec::new();
    let mut errors = Vec::new();

    for (line, (plan, operation)) in operations.into_iter().enumerate() {
        let status = match controller.publish_apply(&plan, operation) {
            Ok(()) => {
                published.push(plan);
                "done".green().bold()
            }
            Err(err) => {
                errors.push(err);
                "failed".red().bold()
            }
        };

        stdout
            .queue(cursor::SavePosition)?
            .queue(cursor::MoveToPreviousLine((lines.len() - line) as u16))?
            .queue(cursor::MoveRight(longest_line as u16 + 5))?
            .queue(style::PrintStyledContent(status))?
            .queue(cursor::RestorePosition)?
            .flush()?;
    }

    for err in errors.iter() {
        print_error(stdout, err)?;
    }

    Ok((published, errors.len()))
}
