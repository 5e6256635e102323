use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use xml2html::config::{self, Config};
use xml2html::generate::{self, BuildContext, GenerateError};
use xml2html::params::{self, Params};
use xml2html::state::StateDocument;
use xml2html::transform::{Passthrough, Transformer, XsltProc};
use xml2html::output;

#[derive(Parser)]
#[command(name = "xml2html")]
#[command(version)]
#[command(about = "Build HTML pages from XML with an XSLT stylesheet")]
#[command(long_about = "\
Build HTML pages from XML with an XSLT stylesheet

Each input is transformed, then post-processed:

  1. a leading <?xml?> declaration and <!DOCTYPE> are removed
  2. <tag/> is rewritten to <tag></tag> unless tag may self-close (br, img, ...)
  3. with -s, indentation and blank lines are stripped outside pre, textarea,
     script and style
  4. the header and footer are added, with @name@ replaced by parameters
  5. the text is encoded with -e (default utf-8)

Single file:   xml2html build -i page.xml -o page.html -t site.xsl -r .
Directory:     xml2html build -r src -o site -t site.xsl -i src/a.xml -i src/b/c.xml
State:         xml2html state init --state state.xml
               xml2html build ... --state state.xml
               xml2html state finalize --state state.xml

Run 'xml2html gen-config' to generate a documented xml2html.toml.")]
struct Cli {
    /// Config file (default: xml2html.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level (otherwise RUST_LOG applies)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transform and post-process documents
    Build(BuildArgs),
    /// Manage the page state document
    #[command(subcommand)]
    State(StateCommand),
    /// Print a stock xml2html.toml with all options documented
    GenConfig,
}

/// `-h` is the header file, as in the classic xml2html command line.
#[derive(clap::Args)]
#[command(disable_help_flag = true)]
struct BuildArgs {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Input file (repeat for directory mode)
    #[arg(short = 'i', long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Output file, or output directory in directory mode
    #[arg(short, long)]
    output: PathBuf,

    /// XSLT stylesheet; without it inputs are taken as finished markup
    #[arg(short = 't', long)]
    transform: Option<PathBuf>,

    /// Root directory: input root in directory mode, otherwise the target of @relroot@
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Header template file
    #[arg(short = 'h', long)]
    header: Option<PathBuf>,

    /// Footer template file
    #[arg(short, long)]
    footer: Option<PathBuf>,

    /// Property for header/footer substitution, name=value
    #[arg(short = 'p', long = "property")]
    properties: Vec<String>,

    /// Output character encoding
    #[arg(short, long)]
    encoding: Option<String>,

    /// Strip indentation and blank lines outside preserved tags
    #[arg(short, long)]
    strip: bool,

    /// Self-closing allow-list directive: +a,b adds, !a removes, a,b replaces
    #[arg(long, allow_hyphen_values = true)]
    selfclose: Vec<String>,

    /// Preserve set directive: +a,b adds, !a removes, a,b replaces
    #[arg(long, allow_hyphen_values = true)]
    preserve: Vec<String>,

    /// Keep the XML declaration and DOCTYPE
    #[arg(long)]
    keep_prologue: bool,

    /// Do not process XInclude before transforming
    #[arg(long)]
    no_xinclude: bool,

    /// Record built pages in this state document
    #[arg(long)]
    state: Option<PathBuf>,

    /// Title selector for the state document
    #[arg(long)]
    title: Option<String>,

    /// Summary selector for the state document
    #[arg(long)]
    summary: Option<String>,

    /// Date selector for the state document
    #[arg(long)]
    date: Option<String>,

    /// Stylesheet parameters, name=value
    params: Vec<String>,
}

#[derive(Subcommand)]
enum StateCommand {
    /// Create the state document if needed and clear staged pages
    Init(StateArgs),
    /// Promote staged pages and prune pages whose files are gone
    Finalize(StateArgs),
    /// List recorded and staged pages
    Show(StateArgs),
}

#[derive(clap::Args)]
struct StateArgs {
    /// State document path
    #[arg(long)]
    state: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Build(args) => {
            let config = config::load_config(cli.config.as_deref())?;
            build(config, args)?;
        }
        Command::State(StateCommand::Init(args)) => {
            let state = StateDocument::initialize(&args.state)?;
            println!(
                "Initialized {} ({} pages)",
                args.state.display(),
                state.pages().len()
            );
        }
        Command::State(StateCommand::Finalize(args)) => {
            let base = std::env::current_dir()?;
            let (report, total) = StateDocument::update(&args.state, |state| {
                let report = state.finalize(&base);
                (report, state.pages().len())
            })?;
            output::print_finalize_report(&report, total);
        }
        Command::State(StateCommand::Show(args)) => {
            let state = StateDocument::load(&args.state)?;
            output::print_state(&state);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn build(mut config: Config, args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Command-line flags layer on top of the config file.
    if let Some(encoding) = args.encoding {
        config.encoding = encoding;
    }
    config.strip |= args.strip;
    config.keep_prologue |= args.keep_prologue;
    config.selfclose.extend(args.selfclose);
    config.preserve.extend(args.preserve);
    if args.header.is_some() {
        config.header = args.header;
    }
    if args.footer.is_some() {
        config.footer = args.footer;
    }
    if args.no_xinclude {
        config.transform.xinclude = false;
    }
    for (field, value) in [
        (&mut config.state.title, args.title),
        (&mut config.state.summary, args.summary),
        (&mut config.state.date, args.date),
    ] {
        if let Some(value) = value {
            *field = value;
        }
    }
    config.validate()?;

    let options = config.render_options()?;
    let templates = generate::load_templates(
        config.header.as_deref(),
        config.footer.as_deref(),
        options.encoding,
    )?;

    let mut properties: Params = config.params.clone().into_iter().collect();
    for raw in &args.properties {
        let (name, value) = params::parse_assignment(raw)?;
        properties.set(name, value);
    }
    let mut xslt_params = Params::new();
    for raw in &args.params {
        let (name, value) = params::parse_assignment(raw)?;
        xslt_params.set(name, value);
    }

    let xslt;
    let transformer: &dyn Transformer = match &args.transform {
        Some(stylesheet) => {
            xslt = XsltProc {
                program: config.transform.program.clone(),
                xinclude: config.transform.xinclude,
                ..XsltProc::new(stylesheet)
            };
            &xslt
        }
        None => &Passthrough,
    };

    let state = match args.state {
        Some(path) => Some((path, config.meta_selectors()?)),
        None => None,
    };

    let jobs = generate::plan_jobs(&args.inputs, &args.output, args.root.as_deref())?;
    let ctx = BuildContext {
        transformer,
        templates,
        options,
        properties,
        xslt_params,
        state,
    };

    init_thread_pool(&config.processing);
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_build_event(&event) {
                println!("{}", line);
            }
        }
    });
    let result = generate::build_all(&ctx, &jobs, Some(&tx));
    drop(tx);
    printer.join().ok();
    let report = result?;

    output::print_build_summary(&report);
    if !report.failed.is_empty() {
        return Err(GenerateError::Failed(report.failed.len(), report.total()).into());
    }
    Ok(())
}

/// Size the global rayon pool that `build_all` renders documents on.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let workers = config::effective_threads(processing);
    if rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
        .is_err()
    {
        tracing::debug!(workers, "document pool already initialized");
    }
}
