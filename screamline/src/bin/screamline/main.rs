mod commands;
mod context;
mod examples;
mod output;
mod theme;

use anyhow::Result;
use clap::{
    ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand,
    builder::{
        Styles,
        styling::{AnsiColor, Color as ClapColor, Style},
    },
};
use colored::{Color as ThemeColor, Colorize, control::ShouldColorize};
use std::fmt::Write;
use std::path::PathBuf;

use commands::{
    repair::{handle_cascade, handle_propagate_image},
    replay::handle_replay,
    worker::handle_worker,
};
use context::RunContext;
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("REDIS_URL", "Redis connection URL referenced by the default config"),
    ("SCREAMLINE_CONFIG", "Path to the config file (same as --config)"),
    ("RUST_LOG", "Log filter, e.g. screamline=debug"),
];

#[derive(Parser)]
#[command(name = "screamline")]
#[command(version)]
#[command(
    about = "Consistency triggers for the scream feed",
    long_about = r#"Runs and repairs the change-event triggers of the scream feed:

• Like and comment notifications for scream owners
• Removal of a deleted scream's comments, likes and notifications
• Profile image propagation onto authored screams

Commands:
  worker           Consume the change stream and run triggers
  replay           Dispatch change events read from a file
  cascade          Finish the cascade of a deleted scream
  propagate-image  Copy a user's current image onto their screams
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Config file (defaults to ./screamline.toml when present)
    #[arg(long, global = true, env = "SCREAMLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the change stream and run triggers until interrupted
    Worker,

    /// Dispatch change events from a JSON or JSON-lines file
    Replay {
        /// File holding the events
        file: PathBuf,
    },

    /// Remove the comments, likes and notifications of a deleted scream
    Cascade {
        /// Id of the deleted scream
        scream_id: String,
    },

    /// Copy a user's current image onto every scream they authored
    #[command(name = "propagate-image")]
    PropagateImage {
        /// Handle of the user
        handle: String,
    },
}

impl Cli {
    fn parse_with_styles() -> Self {
        let command = build_cli_command();
        let matches = command.styles(help_styles()).get_matches();
        match Cli::from_arg_matches(&matches) {
            Ok(cli) => cli,
            Err(err) => err.exit(),
        }
    }
}

fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .after_long_help(render_top_level_appendix(use_color))
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never });
    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand
                .clone()
                .after_long_help(render_examples(example.groups, use_color));
        }
    }
    command
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", stylize("Examples:", THEME.highlight, true, use_color));

    for (index, group) in groups.iter().enumerate() {
        let _ = writeln!(buffer, "  {}", stylize(group.title, THEME.primary, true, use_color));
        for command in group.commands {
            let arrow = stylize(ICONS.arrow, THEME.secondary, false, use_color);
            let _ = writeln!(buffer, "    {arrow} {}", stylize(command, THEME.secondary, false, use_color));
        }
        if index + 1 < groups.len() {
            buffer.push('\n');
        }
    }
    buffer
}

fn render_top_level_appendix(use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(
        buffer,
        "{}",
        stylize("Environment Variables:", THEME.highlight, true, use_color)
    );
    for (key, description) in ENVIRONMENT_VARIABLES {
        let _ = writeln!(
            buffer,
            "  {}  {}",
            stylize(key, THEME.key, true, use_color),
            stylize(description, THEME.value, false, use_color)
        );
    }
    buffer.push('\n');
    let _ = writeln!(
        buffer,
        "{} {}",
        stylize("Tip:", THEME.highlight, true, use_color),
        stylize(
            "Use 'screamline <command> --help' to view examples for each command.",
            THEME.secondary,
            false,
            use_color
        )
    );
    buffer
}

fn stylize(text: &str, color: ThemeColor, bold: bool, use_color: bool) -> String {
    if !use_color {
        return text.to_string();
    }
    let styled = text.color(color);
    if bold { styled.bold().to_string() } else { styled.to_string() }
}

fn help_styles() -> Styles {
    Styles::styled()
        .usage(style_from_color(THEME.primary).bold())
        .header(style_from_color(THEME.highlight).bold())
        .literal(style_from_color(THEME.secondary))
        .placeholder(style_from_color(THEME.muted))
        .valid(style_from_color(THEME.success))
        .invalid(style_from_color(THEME.warning))
        .error(style_from_color(THEME.error).bold())
}

fn style_from_color(color: ThemeColor) -> Style {
    let ansi = match color {
        ThemeColor::Red => AnsiColor::Red,
        ThemeColor::Green => AnsiColor::Green,
        ThemeColor::Yellow => AnsiColor::Yellow,
        ThemeColor::Blue => AnsiColor::Blue,
        ThemeColor::Magenta => AnsiColor::Magenta,
        ThemeColor::Cyan => AnsiColor::Cyan,
        ThemeColor::BrightBlack => AnsiColor::BrightBlack,
        ThemeColor::BrightBlue => AnsiColor::BrightBlue,
        ThemeColor::BrightCyan => AnsiColor::BrightCyan,
        _ => AnsiColor::White,
    };
    Style::new().fg_color(Some(ClapColor::Ansi(ansi)))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse_with_styles();
    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output.clone(),
        quiet: cli.quiet,
        no_color: cli.no_color,
    });

    if let Err(err) = execute(cli, &output).await {
        output.error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn execute(cli: Cli, output: &OutputManager) -> Result<()> {
    let ctx = RunContext::load(cli.config.as_deref())?;
    if let Some(path) = &ctx.config_path {
        log::debug!("loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Worker => handle_worker(&ctx, output).await,
        Commands::Replay { file } => handle_replay(&ctx, &file, output).await,
        Commands::Cascade { scream_id } => handle_cascade(&ctx, &scream_id, output).await,
        Commands::PropagateImage { handle } => handle_propagate_image(&ctx, &handle, output).await,
    }
}
