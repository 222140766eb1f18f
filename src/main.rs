//! taskforge CLI: thin front-end over the agent loop.

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use taskforge::agent::{AskUserRequest, LimitDecision, PauseDecision};
use taskforge::state::TodoItem;
use taskforge::subagent::{SubAgentOrchestrator, SubAgentProfile};
use taskforge::tools::TaskSpawnTool;
use taskforge::{AgentBuilder, AgentLoop, AnthropicClient, LlmClient, OpenAiClient, SkillSet, StateManager};

#[derive(Parser, Debug)]
#[command(
    name = "taskforge",
    about = "Autonomous task execution engine",
    after_help = "Examples:\n  \
        taskforge --project-dir ~/my-project \"Create a script that fetches weather data\"\n  \
        taskforge --interactive\n  \
        taskforge --model gpt-4o \"Analyze this code\"\n  \
        taskforge --subagents \"Research this codebase and write tests\"\n  \
        taskforge --resume abc123def456"
)]
struct Cli {
    /// Task to execute (required unless --interactive or --resume)
    task: Option<String>,

    /// Run in interactive REPL mode
    #[arg(short, long)]
    interactive: bool,

    /// Model to use
    #[arg(short, long, default_value = taskforge::DEFAULT_MODEL)]
    model: String,

    /// Project directory where generated code will be placed
    #[arg(short, long)]
    project_dir: Option<PathBuf>,

    /// Load additional skills from a directory of JSON definitions
    #[arg(short = 't', long = "load-tools", value_name = "PATH")]
    load_tools: Option<PathBuf>,

    /// Enable sub-executor spawning capability
    #[arg(short, long)]
    subagents: bool,

    /// Resume a previous session
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// List available sessions to resume
    #[arg(long)]
    list_sessions: bool,

    /// Maximum agent loop iterations
    #[arg(long, default_value_t = 120)]
    max_iterations: usize,

    /// LLM temperature
    #[arg(long, default_value_t = 0.0)]
    temperature: f64,

    /// Path to custom system prompt file
    #[arg(long, value_name = "PATH")]
    system_prompt: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, default_value_t = true)]
    verbose: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long)]
    quiet: bool,
}

fn read_line(prompt: &str) -> Option<String> {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
    let mut buf = String::new();
    match std::io::stdin().read_line(&mut buf) {
        Ok(0) => None, // EOF
        Ok(_) => Some(buf.trim().to_string()),
        Err(_) => None,
    }
}

fn pause_menu() -> PauseDecision {
    println!("\nPaused. What would you like to do?");
    println!("  [c] Continue");
    println!("  [s] Stop");
    println!("  [f] Give feedback/redirect");
    match read_line("\nChoice: ").as_deref() {
        Some("s") => {
            println!("Stopping...");
            PauseDecision::Stop
        }
        Some("f") => match read_line("Your feedback: ") {
            Some(feedback) if !feedback.is_empty() => PauseDecision::Feedback(feedback),
            _ => PauseDecision::Continue,
        },
        None => PauseDecision::Stop, // EOF
        _ => {
            println!("Continuing...");
            PauseDecision::Continue
        }
    }
}

fn iteration_warning(iterations_left: usize, incomplete: &[TodoItem]) -> LimitDecision {
    println!("\nApproaching iteration limit ({} iterations left)", iterations_left);
    println!("   {} task(s) still incomplete:", incomplete.len());
    for todo in incomplete.iter().take(5) {
        println!("     {}", todo);
    }
    if incomplete.len() > 5 {
        println!("     ... and {} more", incomplete.len() - 5);
    }
    println!("\nWhat would you like to do?");
    println!("  [w] Wrap up - summarize current progress");
    println!("  [c] Continue - keep going (may hit limit)");
    println!("  [+N] Add N more iterations (e.g. +10, +25)");

    match read_line("\nChoice [w/c/+N]: ").as_deref() {
        Some("w") | None => LimitDecision::WrapUp,
        Some(choice) if choice.starts_with('+') => match choice[1..].parse() {
            Ok(n) => LimitDecision::Extend(n),
            Err(_) => LimitDecision::Continue,
        },
        _ => LimitDecision::Continue,
    }
}

fn prompt_user(request: &AskUserRequest) -> String {
    println!("\n{}", "=".repeat(60));
    println!("AGENT NEEDS YOUR INPUT");
    println!("{}", "=".repeat(60));
    if let Some(context) = &request.context {
        println!("\nContext: {}", context);
    }
    println!("\n{}", request.question);

    if !request.options.is_empty() {
        println!("\nOptions:");
        for (i, option) in request.options.iter().enumerate() {
            let marker =
                if Some(option) == request.default.as_ref() { " (default)" } else { "" };
            println!("  [{}] {}{}", i + 1, option, marker);
        }
        println!("  [0] Other (type your own response)");

        let answer = read_line("\nYour choice: ").unwrap_or_default();
        if answer.is_empty() {
            return request
                .default
                .clone()
                .unwrap_or_else(|| request.options[0].clone());
        }
        if let Ok(idx) = answer.parse::<usize>() {
            if idx >= 1 && idx <= request.options.len() {
                return request.options[idx - 1].clone();
            }
            if idx == 0 {
                return read_line("Your response: ").unwrap_or_default();
            }
        }
        return answer;
    }

    match read_line("\nYour response: ") {
        Some(answer) if !answer.is_empty() => answer,
        _ => request
            .default
            .clone()
            .unwrap_or_else(|| "No response provided".to_string()),
    }
}

fn build_llm(model: &str, temperature: f64) -> Result<Arc<dyn LlmClient>, String> {
    // Model id picks the provider: OpenAI-style names go to the
    // OpenAI-compatible client, everything else to Anthropic.
    if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3") {
        Ok(Arc::new(OpenAiClient::new(model).with_temperature(temperature as f32)))
    } else {
        AnthropicClient::from_env(model)
            .map(|c| Arc::new(c.with_temperature(temperature)) as Arc<dyn LlmClient>)
            .map_err(|e| e.to_string())
    }
}

async fn run_interactive(agent: &mut AgentLoop) {
    println!("Ready! Enter your task or question. ('exit' quits, 'status' and 'clear' are commands)\n");
    loop {
        let Some(input) = read_line("\n> ") else {
            println!("\nGoodbye!");
            break;
        };
        if input.is_empty() {
            continue;
        }
        match input.as_str() {
            "exit" => break,
            "status" => {
                println!("\nSession: {}", agent.session_id());
                println!("Messages: {}", agent.context().len());
                println!("Iterations: {}", agent.iteration_count());
                println!("Tokens: ~{}", agent.total_usage().total());
                continue;
            }
            "clear" => {
                println!("Context cleared (start a fresh task).");
                continue;
            }
            _ => {}
        }
        let response = agent.run(&input, None).await;
        println!("\n{}", response);
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap renders --help/--version through the same path
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let verbose = cli.verbose && !cli.quiet;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if verbose {
                    "taskforge=info".into()
                } else {
                    "taskforge=warn".into()
                }
            }),
        )
        .init();

    if cli.list_sessions {
        let manager = StateManager::new(".agent_states");
        match manager.list_sessions() {
            Ok(sessions) if sessions.is_empty() => println!("No saved sessions found."),
            Ok(sessions) => {
                println!("\nAvailable Sessions:");
                println!("{}", "-".repeat(60));
                for s in sessions {
                    println!(
                        "  {}  |  {}  |  {} tasks",
                        s.session_id,
                        s.updated_at.format("%Y-%m-%d %H:%M:%S"),
                        s.task_count
                    );
                }
            }
            Err(e) => {
                eprintln!("Error: failed to list sessions: {}", e);
                std::process::exit(2);
            }
        }
        return;
    }

    if cli.task.is_none() && !cli.interactive && cli.resume.is_none() {
        eprintln!("Error: Must provide a task, use --interactive, or --resume");
        std::process::exit(1);
    }

    let project_dir = cli
        .project_dir
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    if let Err(e) = std::fs::create_dir_all(&project_dir) {
        eprintln!("Error: cannot create project directory: {}", e);
        std::process::exit(2);
    }
    if verbose {
        println!("Project directory: {}", project_dir.display());
    }

    let system_prompt = match &cli.system_prompt {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                eprintln!("Error: cannot read system prompt {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let skills = Arc::new(match &cli.load_tools {
        Some(path) => SkillSet::load_dir(path),
        None => SkillSet::new(),
    });

    let llm = match build_llm(&cli.model, cli.temperature) {
        Ok(llm) => llm,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let mut builder = AgentBuilder::new(&project_dir)
        .model(&cli.model)
        .temperature(cli.temperature)
        .max_iterations(cli.max_iterations)
        .verbose(verbose)
        .skills(Arc::clone(&skills))
        .llm(Arc::clone(&llm));

    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }

    if cli.subagents {
        let model = cli.model.clone();
        let temperature = cli.temperature;
        let factory = Arc::new(move |profile: &SubAgentProfile| {
            build_llm(&profile.model, profile.temperature)
                .or_else(|_| build_llm(&model, temperature))
                .unwrap_or_else(|_| Arc::clone(&llm))
        });
        let sub_orchestrator = Arc::new(SubAgentOrchestrator::new(
            taskforge::tools::build_registry_with_skills(&project_dir, Some(Arc::clone(&skills))),
            &project_dir,
            factory,
        ));
        builder = builder.add_tool(Arc::new(TaskSpawnTool::new(sub_orchestrator)));
    }

    let mut agent = match builder.build() {
        Ok(agent) => agent
            .on_pause_menu(Arc::new(pause_menu))
            .on_iteration_warning(Arc::new(iteration_warning))
            .on_user_prompt(Arc::new(prompt_user)),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if let Some(session_id) = &cli.resume {
        if agent.load_session(session_id) {
            if verbose {
                println!("Resumed session: {}", session_id);
            }
        } else {
            eprintln!("Error: Session not found: {}", session_id);
            std::process::exit(1);
        }
    }

    // Ctrl+C sets the pause flag and nothing else; the loop runs the
    // menu at its next safe boundary.
    let interrupts = agent.interrupt_handle();
    let signal_task = tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            println!("\n\nPaused. Processing...");
            interrupts.pause();
        }
    });

    if cli.interactive {
        run_interactive(&mut agent).await;
    } else if let Some(task) = &cli.task {
        let result = agent.run(task, Some(cli.max_iterations)).await;
        println!("\nResult:\n{}", result);
        if result.starts_with("(Error:") {
            signal_task.abort();
            std::process::exit(2);
        }
    }

    signal_task.abort();
}
