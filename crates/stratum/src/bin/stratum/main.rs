mod cli;

use serde::Serialize;
use std::sync::atomic::AtomicBool;
use stratum::collaborators::{Collaborators, StaticOutputs};
use stratum::config::EngineConfig;
use stratum::Engine;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("STRATUM_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = engine(&cli.engine).and_then(|engine| match cli.command {
        cli::Command::Describe(describe_cli) => describe(&engine, describe_cli),
        cli::Command::List(list_cli) => list(&engine, list_cli),
        cli::Command::Validate => validate(&engine),
    });

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

fn engine(args: &cli::EngineArgs) -> anyhow::Result<Engine> {
    let mut config = EngineConfig::load(&args.config)?;

    if let Some(base_path) = &args.base_path {
        config.base_path = base_path.clone();
    }
    if let Some(strategy) = args.list_merge_strategy {
        config.settings.list_merge_strategy = strategy;
    }

    let mut collaborators = Collaborators::default();
    if let Some(outputs_file) = &args.outputs_file {
        collaborators = collaborators.with_outputs(StaticOutputs::load(outputs_file)?);
    }

    Ok(Engine::new(config, collaborators))
}

pub fn describe(engine: &Engine, cli: cli::DescribeCommand) -> anyhow::Result<()> {
    use cli::DescribeSubCommand::*;

    match cli.command {
        Component {
            component,
            stack,
            provenance,
            dependencies,
        } => {
            let (resolved, edges) = engine.resolve_component_with_dependencies(&component, &stack)?;
            let mut resolved = (*resolved).clone();
            if !provenance {
                resolved.provenance.clear();
            }

            if dependencies {
                #[derive(Serialize)]
                struct WithDependencies<'a> {
                    #[serde(flatten)]
                    component: &'a stratum::component::ResolvedComponentConfig,
                    dependencies: &'a [stratum::resolution::DependencyEdge],
                }

                output(
                    &cli.output,
                    &WithDependencies {
                        component: &resolved,
                        dependencies: &edges,
                    },
                )
            } else {
                output(&cli.output, &resolved)
            }
        }
        Stack { stack } => output(&cli.output, &engine.resolve_stack(&stack)?.tree),
        Locals { stack } => {
            let locals: indexmap::IndexMap<String, stratum::value::Value> = engine
                .describe_locals(&stack)?
                .into_iter()
                .map(|(path, locals)| (path.display().to_string(), locals))
                .collect();
            output(&cli.output, &locals)
        }
    }
}

pub fn list(engine: &Engine, cli: cli::ListCommand) -> anyhow::Result<()> {
    use cli::ListSubCommand::*;

    match cli.command {
        Components { stack } => output(
            &cli.output,
            &engine.list_deployable_components(stack.as_deref())?,
        ),
        Stacks => output(&cli.output, &engine.list_stacks()?),
    }
}

pub fn validate(engine: &Engine) -> anyhow::Result<()> {
    let report = engine.validate_all(&AtomicBool::new(false))?;

    for stack in &report.broken_stacks {
        eprintln!("{} ({}):", stack.name, stack.manifest.display());
        print_chain(&*stack.error);
    }
    for (component, error) in report.failures() {
        eprintln!("{}@{}:", component.component, component.stack);
        print_chain(error);
    }

    anyhow::ensure!(
        report.is_success(),
        "{} of {} components failed to resolve, {} stacks could not be loaded",
        report.outcomes.len() - report.resolved(),
        report.outcomes.len(),
        report.broken_stacks.len()
    );
    eprintln!("{} components resolved", report.resolved());
    Ok(())
}

fn print_chain(error: &dyn std::error::Error) {
    let mut source = Some(error);
    while let Some(error) = source {
        eprintln!("  {error}");
        source = error.source();
    }
}

fn output(output: &cli::OutputArgs, value: &impl Serialize) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}
