use crate::{
    app::App,
    consolidate::ConsolidatedNode,
    filter::{FilterState, VisibilityReport},
    game::{supported_games, GameId},
    log::LogLevel,
    report::Severity,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::{
    fmt::Write,
    io::Read,
    thread,
    time::{Duration, Instant},
};

const PREVIEW_TIMEOUT: Duration = Duration::from_secs(90);
const PREVIEW_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuideExport {
    Html,
    Json,
}

#[derive(Debug, PartialEq)]
enum CliCommand {
    Analyze {
        source: String,
        game: Option<GameId>,
        game_version: Option<String>,
        branch: Option<String>,
    },
    Preview {
        source: String,
    },
    Report {
        search: Option<String>,
        hide: Vec<Severity>,
        copy: bool,
    },
    Guide {
        resolve: Vec<String>,
        export: Option<GuideExport>,
    },
    Filter {
        show: Vec<Severity>,
        hide: Vec<Severity>,
        toggle: Vec<Severity>,
    },
    Ask(String),
    Searches,
    Save(String),
    Forget(String),
    Lists,
    Clear,
    Games,
    Help,
    Version,
}

#[derive(Debug, PartialEq)]
struct CliAction {
    command: CliCommand,
    format: OutputFormat,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = parse_args(&args)?;
    match action.command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("loadcheck v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::Games => list_games(action.format),
        command => {
            let mut app = App::initialize()?;
            run_command(&mut app, command, action.format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<CliAction> {
    let help = CliAction {
        command: CliCommand::Help,
        format: OutputFormat::Text,
    };
    if args.is_empty()
        || matches!(args.first().map(|s| s.as_str()), Some("--help" | "-h" | "help"))
    {
        return Ok(help);
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--version" | "-V" | "version")) {
        return Ok(CliAction {
            command: CliCommand::Version,
            format: OutputFormat::Text,
        });
    }

    let (format, tokens) = parse_global_options(args)?;
    let Some(head) = tokens.first() else {
        return Ok(help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "analyze" => parse_analyze(rest)?,
        "preview" => CliCommand::Preview {
            source: rest
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("preview requires a file path or '-'"))?,
        },
        "report" => parse_report(rest)?,
        "guide" => parse_guide(rest)?,
        "filter" => parse_filter(rest)?,
        "ask" => {
            let question = rest.join(" ");
            if question.trim().is_empty() {
                bail!("ask requires a question");
            }
            CliCommand::Ask(question)
        }
        "searches" => CliCommand::Searches,
        "save" => {
            let name = rest.join(" ");
            if name.trim().is_empty() {
                bail!("save requires a name");
            }
            CliCommand::Save(name)
        }
        "forget" => {
            let name = rest.join(" ");
            if name.trim().is_empty() {
                bail!("forget requires a name");
            }
            CliCommand::Forget(name)
        }
        "lists" => CliCommand::Lists,
        "clear" => CliCommand::Clear,
        "games" => CliCommand::Games,
        other => bail!("Unknown command: {other} (see --help)"),
    };
    Ok(CliAction { command, format })
}

fn parse_global_options(args: &[String]) -> Result<(OutputFormat, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = parse_format(value)?;
            continue;
        }
        if arg == "--format" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow!("--format requires a value"))?;
            format = parse_format(value)?;
            continue;
        }
        tokens.push(arg.to_string());
    }
    Ok((format, tokens))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).ok_or_else(|| anyhow!("Unknown format: {value} (use text or json)"))
}

fn parse_analyze(args: &[String]) -> Result<CliCommand> {
    let mut source = None;
    let mut game = None;
    let mut game_version = None;
    let mut branch = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--game" => {
                let value = iter.next().ok_or_else(|| anyhow!("--game requires a value"))?;
                game = Some(parse_game(value)?);
            }
            value if value.starts_with("--game=") => {
                game = Some(parse_game(value.trim_start_matches("--game="))?);
            }
            "--game-version" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--game-version requires a value"))?;
                game_version = Some(value.to_string());
            }
            value if value.starts_with("--game-version=") => {
                game_version = Some(value.trim_start_matches("--game-version=").to_string());
            }
            "--branch" => {
                let value = iter.next().ok_or_else(|| anyhow!("--branch requires a value"))?;
                branch = Some(value.to_string());
            }
            value if value.starts_with("--branch=") => {
                branch = Some(value.trim_start_matches("--branch=").to_string());
            }
            value if value.starts_with("--") => bail!("Unknown analyze option: {value}"),
            value => source = Some(value.to_string()),
        }
    }
    Ok(CliCommand::Analyze {
        source: source.ok_or_else(|| anyhow!("analyze requires a file path or '-'"))?,
        game,
        game_version,
        branch,
    })
}

fn parse_game(value: &str) -> Result<GameId> {
    GameId::parse(value).ok_or_else(|| anyhow!("Unknown game: {value} (see 'loadcheck games')"))
}

fn parse_report(args: &[String]) -> Result<CliCommand> {
    let mut search = None;
    let mut hide = Vec::new();
    let mut copy = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--search" => {
                let value = iter.next().ok_or_else(|| anyhow!("--search requires a value"))?;
                search = Some(value.to_string());
            }
            value if value.starts_with("--search=") => {
                search = Some(value.trim_start_matches("--search=").to_string());
            }
            "--hide" => {
                let value = iter.next().ok_or_else(|| anyhow!("--hide requires a value"))?;
                hide.extend(parse_severities(value)?);
            }
            value if value.starts_with("--hide=") => {
                hide.extend(parse_severities(value.trim_start_matches("--hide="))?);
            }
            "--copy" => copy = true,
            other => bail!("Unknown report option: {other}"),
        }
    }
    Ok(CliCommand::Report { search, hide, copy })
}

fn parse_filter(args: &[String]) -> Result<CliCommand> {
    let mut show = Vec::new();
    let mut hide = Vec::new();
    let mut toggle = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let target = match flag {
            "--show" => &mut show,
            "--hide" => &mut hide,
            "--toggle" => &mut toggle,
            other => bail!("Unknown filter option: {other}"),
        };
        let value = match inline {
            Some(value) => value,
            None => iter
                .next()
                .cloned()
                .ok_or_else(|| anyhow!("{flag} requires errors, warnings or info"))?,
        };
        target.extend(parse_severities(&value)?);
    }
    Ok(CliCommand::Filter { show, hide, toggle })
}

/// Stored toggles with the one-off `--hide` severities switched off on top.
fn report_filter(stored: FilterState, hide: &[Severity]) -> FilterState {
    let mut filter_state = stored;
    for severity in hide {
        filter_state.set(*severity, false);
    }
    filter_state
}

fn parse_severities(value: &str) -> Result<Vec<Severity>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Severity::parse(part).ok_or_else(|| anyhow!("Unknown severity: {part}")))
        .collect()
}

fn parse_guide(args: &[String]) -> Result<CliCommand> {
    let mut resolve = Vec::new();
    let mut export = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        match flag {
            "--resolve" => {
                let value = match inline {
                    Some(value) => value,
                    None => iter
                        .next()
                        .cloned()
                        .ok_or_else(|| anyhow!("--resolve requires fix ids"))?,
                };
                resolve.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string),
                );
            }
            "--export" => {
                let value = match inline {
                    Some(value) => value,
                    None => iter
                        .next()
                        .cloned()
                        .ok_or_else(|| anyhow!("--export requires html or json"))?,
                };
                export = Some(match value.as_str() {
                    "html" => GuideExport::Html,
                    "json" => GuideExport::Json,
                    other => bail!("Unknown export format: {other} (use html or json)"),
                });
            }
            other => bail!("Unknown guide option: {other}"),
        }
    }
    Ok(CliCommand::Guide { resolve, export })
}

fn run_command(app: &mut App, command: CliCommand, format: OutputFormat) -> Result<()> {
    for entry in app.log.entries() {
        if entry.level != LogLevel::Info {
            eprintln!("warning: {}", entry.message);
        }
    }
    match command {
        CliCommand::Analyze {
            source,
            game,
            game_version,
            branch,
        } => {
            if let Some(game) = game {
                app.set_game(game);
            }
            if let Some(version) = game_version.as_deref() {
                app.set_game_version(version);
            }
            if let Some(branch) = branch.as_deref() {
                app.set_masterlist_branch(branch);
            }
            analyze(app, &source, format)
        }
        CliCommand::Preview { source } => preview(app, &source, format),
        CliCommand::Report { search, hide, copy } => {
            report(app, search.as_deref(), &hide, copy, format)
        }
        CliCommand::Guide { resolve, export } => guide(app, &resolve, export, format),
        CliCommand::Filter { show, hide, toggle } => {
            filter(app, &show, &hide, &toggle, format)
        }
        CliCommand::Ask(question) => ask(app, &question, format),
        CliCommand::Searches => print_lines(&app.context().recent_searches, format),
        CliCommand::Save(name) => {
            app.save_current_list(&name)?;
            println!("Saved \"{}\"", name.trim());
            Ok(())
        }
        CliCommand::Forget(name) => {
            if !app.forget_saved_list(&name) {
                bail!("No saved list named \"{}\"", name.trim());
            }
            println!("Removed \"{}\"", name.trim());
            Ok(())
        }
        CliCommand::Lists => list_saved(app, format),
        CliCommand::Clear => {
            app.clear_mod_list();
            println!("{}", app.status);
            Ok(())
        }
        CliCommand::Games | CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("read mod list from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(source).with_context(|| format!("read mod list {source}"))
}

fn toast_error(app: &App, fallback: &str) -> anyhow::Error {
    match &app.toast {
        Some(toast) => anyhow!("{}", toast.message),
        None => anyhow!("{fallback}"),
    }
}

fn analyze(app: &mut App, source: &str, format: OutputFormat) -> Result<()> {
    let text = read_source(source)?;
    app.edit_mod_list(&text, Instant::now());
    if !app.run_analysis() {
        return Err(toast_error(app, "Analysis failed"));
    }
    eprintln!("{}", app.status);
    report(app, None, &[], false, format)
}

fn preview(app: &mut App, source: &str, format: OutputFormat) -> Result<()> {
    let text = read_source(source)?;
    let start = Instant::now();
    app.edit_mod_list(&text, start);
    while app.is_busy() {
        if start.elapsed() > PREVIEW_TIMEOUT {
            bail!("Timed out waiting for the backend");
        }
        thread::sleep(PREVIEW_POLL);
        app.tick(Instant::now());
    }
    if let Some(toast) = &app.toast {
        eprintln!("warning: {}", toast.message);
    }

    let Some(preview) = app.preview() else {
        bail!("Mod list is empty");
    };
    let recommendations = app.recommendations();
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct PreviewOutput<'a> {
                normalized_text: &'a str,
                total: usize,
                recognized: usize,
                unknown: usize,
                recommendations: Vec<&'a str>,
            }
            let output = PreviewOutput {
                normalized_text: &preview.normalized_text,
                total: preview.summary.total,
                recognized: preview.summary.recognized,
                unknown: preview.summary.unknown,
                recommendations: recommendations
                    .recommendations
                    .iter()
                    .map(|rec| rec.name.as_str())
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!(
                "{} plugins, {} recognized, {} unknown",
                preview.summary.total, preview.summary.recognized, preview.summary.unknown
            );
            for entry in &preview.entries {
                let marker = if entry.recognized { ' ' } else { '?' };
                let state = if entry.enabled { '*' } else { '-' };
                println!("{marker} {state}{}", entry.plugin);
            }
            if !recommendations.recommendations.is_empty() {
                println!();
                println!("Recommended:");
                for rec in &recommendations.recommendations {
                    match rec.reason.as_deref() {
                        Some(reason) => println!("  {} ({reason})", rec.name),
                        None => println!("  {}", rec.name),
                    }
                }
            }
            for warning in &recommendations.warnings {
                println!("note: {warning}");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CardItem {
    severity: Severity,
    title: String,
    grouped: bool,
    issue_count: usize,
    affected_mods: Vec<String>,
    messages: Vec<String>,
}

impl CardItem {
    fn from_node(severity: Severity, node: &ConsolidatedNode) -> Self {
        let affected_mods = match node {
            ConsolidatedNode::Group(group) => group.affected_mods.clone(),
            ConsolidatedNode::Single(issue) => vec![issue.mod_label().to_string()],
        };
        Self {
            severity,
            title: node.title(),
            grouped: matches!(node, ConsolidatedNode::Group(_)),
            issue_count: node.issue_count(),
            affected_mods,
            messages: node
                .issues()
                .into_iter()
                .map(|issue| issue.display_message())
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct ReportOutput {
    cards: Vec<CardItem>,
    impact: Vec<String>,
    eligible: usize,
    visible: usize,
    load_order: Vec<String>,
}

fn report(
    app: &mut App,
    search: Option<&str>,
    hide: &[Severity],
    copy: bool,
    format: OutputFormat,
) -> Result<()> {
    if let Some(query) = search {
        app.commit_search(query);
    }
    let view = if hide.is_empty() {
        app.view()
    } else {
        app.view_with(report_filter(app.context().filter_state, hide))
    };
    let view =
        view.ok_or_else(|| anyhow!("No analysis yet; run 'loadcheck analyze <file>' first"))?;
    if copy && !app.copy_report_to_clipboard() {
        eprintln!("warning: {}", toast_error(app, "Clipboard unavailable"));
    }

    let mut cards = Vec::new();
    for section in &view.report.sections {
        for (index, node) in section.nodes.iter().enumerate() {
            if view.visibility.node_visible(section.severity, index) {
                cards.push(CardItem::from_node(section.severity, node));
            }
        }
    }
    let result = app
        .context()
        .last_analysis
        .as_ref()
        .context("analysis disappeared")?;
    let impact: Vec<String> = result
        .impact_entries()
        .iter()
        .zip(view.visibility.impact.iter())
        .filter(|(_, visible)| **visible)
        .map(|(entry, _)| match entry.score {
            Some(score) => format!("{} ({score:.1})", entry.mod_name),
            None => entry.mod_name.clone(),
        })
        .collect();
    let load_order = result.load_order().unwrap_or(&[]).to_vec();

    let output = ReportOutput {
        cards,
        impact,
        eligible: view.visibility.eligible,
        visible: view.visibility.visible,
        load_order,
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => print!(
            "{}",
            render_report(
                app.context().selected_game.display_name(),
                &output,
                &view.visibility
            )
        ),
    }
    Ok(())
}

fn render_report(
    game_name: &str,
    output: &ReportOutput,
    visibility: &VisibilityReport,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Load order report: {game_name}");
    for severity in Severity::ALL {
        let section_cards: Vec<&CardItem> = output
            .cards
            .iter()
            .filter(|card| card.severity == severity)
            .collect();
        if section_cards.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n== {} ({}) ==", severity.label(), section_cards.len());
        for card in section_cards {
            let _ = writeln!(out, "- {}", card.title);
            if card.grouped {
                let _ = writeln!(out, "    Affects: {}", card.affected_mods.join(", "));
            }
        }
    }
    if !output.impact.is_empty() {
        out.push_str("\n== Performance impact ==\n");
        for line in &output.impact {
            let _ = writeln!(out, "  {line}");
        }
    }
    if !output.load_order.is_empty() {
        out.push_str("\n== Suggested load order ==\n");
        for (index, name) in output.load_order.iter().enumerate() {
            let _ = writeln!(out, "{:>4}. {name}", index + 1);
        }
    }
    if let Some(line) = visibility.no_results_line() {
        let _ = writeln!(out, "\n{line}");
    } else if let Some(line) = visibility.showing_line() {
        let _ = writeln!(out, "\n{line}");
    } else if visibility.eligible == 0 {
        out.push_str("\nNo issues found.\n");
    }
    out
}

fn guide(
    app: &mut App,
    resolve: &[String],
    export: Option<GuideExport>,
    format: OutputFormat,
) -> Result<()> {
    for id in resolve {
        if !app.set_resolved(id, true) {
            bail!("No fix step with id {id}");
        }
    }
    match export {
        Some(GuideExport::Html) => {
            let path = app.export_guide_html()?;
            println!("{}", path.display());
        }
        Some(GuideExport::Json) => {
            let path = app.export_guide_json()?;
            println!("{}", path.display());
        }
        None => match format {
            OutputFormat::Json => println!("{}", app.document().export_json()?),
            OutputFormat::Text => print!("{}", app.document().render_text()),
        },
    }
    Ok(())
}

fn filter(
    app: &mut App,
    show: &[Severity],
    hide: &[Severity],
    toggle: &[Severity],
    format: OutputFormat,
) -> Result<()> {
    for severity in show {
        app.set_severity_visible(*severity, true);
    }
    for severity in hide {
        app.set_severity_visible(*severity, false);
    }
    for severity in toggle {
        app.toggle_severity(*severity);
    }
    let filter_state = app.context().filter_state;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&filter_state)?),
        OutputFormat::Text => {
            for severity in Severity::ALL {
                let state = if filter_state.enabled(severity) {
                    "shown"
                } else {
                    "hidden"
                };
                println!("{:<10} {state}", severity.label());
            }
        }
    }
    Ok(())
}

fn ask(app: &mut App, question: &str, format: OutputFormat) -> Result<()> {
    let reply = app
        .ask_assistant(question)
        .ok_or_else(|| toast_error(app, "The assistant had no answer"))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "reply": reply })),
        OutputFormat::Text => println!("{reply}"),
    }
    Ok(())
}

fn print_lines(lines: &[String], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(lines)?),
        OutputFormat::Text => {
            for line in lines {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn list_saved(app: &App, format: OutputFormat) -> Result<()> {
    let lists = &app.context().saved_lists;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(lists)?);
        return Ok(());
    }
    if lists.is_empty() {
        println!("No saved lists.");
    }
    for list in lists {
        println!(
            "{}  {} mods  {}",
            list.name,
            list.mod_count,
            list.game.display_name()
        );
    }
    Ok(())
}

fn list_games(format: OutputFormat) -> Result<()> {
    #[derive(Serialize)]
    struct GameItem {
        id: &'static str,
        name: &'static str,
    }
    let games: Vec<GameItem> = supported_games()
        .into_iter()
        .map(|game| GameItem {
            id: game.as_str(),
            name: game.display_name(),
        })
        .collect();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&games)?),
        OutputFormat::Text => {
            for game in games {
                println!("{:<10} {}", game.id, game.name);
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("loadcheck v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  loadcheck analyze <file|->          Analyze a plugins.txt / modlist.txt");
    println!("  loadcheck preview <file|->          Normalize a list and fetch recommendations");
    println!("  loadcheck report                    Show the last report as cards");
    println!("  loadcheck guide                     Show the fix guide for the last report");
    println!("  loadcheck filter                    Show or change which severities report lists");
    println!("  loadcheck ask <question>            Ask the assistant about the report");
    println!("  loadcheck searches                  Recent searches");
    println!("  loadcheck save <name>               Remember the current list");
    println!("  loadcheck lists                     Saved lists");
    println!("  loadcheck forget <name>             Drop a saved list");
    println!("  loadcheck clear                     Forget the mod list and its report");
    println!("  loadcheck games                     Supported games");
    println!();
    println!("Analyze options:");
    println!("  --game <id>                         Game id (default from config)");
    println!("  --game-version <version>            Installed game version");
    println!("  --branch <name>                     Masterlist branch (default v0.21)");
    println!();
    println!("Report options:");
    println!("  --search <text>                     Only cards mentioning <text>");
    println!("  --hide <errors,warnings,info>       Also hide severities for this run");
    println!("  --copy                              Copy the plain-text report");
    println!();
    println!("Filter options:");
    println!("  --show <errors,warnings,info>       Show severities in later reports");
    println!("  --hide <errors,warnings,info>       Hide severities in later reports");
    println!("  --toggle <errors,warnings,info>     Flip severities");
    println!();
    println!("Guide options:");
    println!("  --resolve <id,...>                  Mark fix steps resolved (err-0, warn-2)");
    println!("  --export <html|json>                Write the guide to the exports folder");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                Output format");
    println!("  -h, --help                          Show help");
    println!("  -V, --version                       Show version");
}
