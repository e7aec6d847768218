// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use kood::{
    board::Card,
    classify,
    config,
    store::BoardStore,
    sync::{self, SyncKind, Synced},
    Board, Git2Backend,
};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{
    env,
    fs::{read_to_string, remove_file, write},
    path::{Path, PathBuf},
    process::{exit, Command as Process},
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "kood [options] <kood-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Show debug logs.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Board(opts) => run_board(opts),
            Command::Switch(opts) => run_switch(opts),
            Command::List(opts) => run_list(opts),
            Command::Card(opts) => run_card(opts),
            Command::Edit(opts) => run_edit(opts),
            Command::Pull(opts) => run_remote(SyncKind::Pull, opts),
            Command::Push(opts) => run_remote(SyncKind::Push, opts),
            Command::Sync(opts) => run_remote(SyncKind::Sync, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show boards, or create and delete them.
    #[command(override_usage = "kood board [options] [<board_id>]")]
    Board(BoardOptions),

    /// Select current board.
    #[command(override_usage = "kood switch <board_id>", visible_alias = "select")]
    Switch(SwitchOptions),

    /// Show lists of current board, or create and delete them.
    #[command(override_usage = "kood list [options] [<list_id>]")]
    List(ListOptions),

    /// Show cards of current board, or create and delete them.
    #[command(override_usage = "kood card [options] [<card>]")]
    Card(CardOptions),

    /// Edit title and content of a card.
    #[command(override_usage = "kood edit <card>")]
    Edit(EditOptions),

    /// Pull board from remote.
    #[command(override_usage = "kood pull [options] [<board_id>]")]
    Pull(RemoteOptions),

    /// Push board to remote.
    #[command(override_usage = "kood push [options] [<board_id>]")]
    Push(RemoteOptions),

    /// Pull board from remote, then push it back.
    #[command(override_usage = "kood sync [options] [<board_id>]")]
    Sync(RemoteOptions),
}

#[derive(Args, Clone, Debug)]
struct BoardOptions {
    /// Board to create or delete, current board if deleting without one.
    #[arg(value_name = "board_id")]
    pub board_id: Option<String>,

    /// Keep new board in repository at target path.
    #[arg(short, long, value_name = "path", conflicts_with = "delete")]
    pub repo: Option<PathBuf>,

    /// Delete board instead of creating it.
    #[arg(short, long)]
    pub delete: bool,

    /// Do not ask for confirmation before deleting.
    #[arg(short, long, requires = "delete")]
    pub yes: bool,
}

#[derive(Args, Clone, Debug)]
struct SwitchOptions {
    /// Board to select.
    #[arg(required = true, value_name = "board_id")]
    pub board_id: String,
}

#[derive(Args, Clone, Debug)]
struct ListOptions {
    /// List to create or delete.
    #[arg(value_name = "list_id")]
    pub list_id: Option<String>,

    /// Delete list and its cards instead of creating it.
    #[arg(short, long, requires = "list_id")]
    pub delete: bool,
}

#[derive(Args, Clone, Debug)]
struct CardOptions {
    /// Title of card to create, or id or title of card to show or delete.
    #[arg(value_name = "card")]
    pub card: Option<String>,

    /// Create card in target list.
    #[arg(short, long, value_name = "list_id", requires = "card", conflicts_with = "delete")]
    pub list: Option<String>,

    /// Delete card.
    #[arg(short, long, requires = "card")]
    pub delete: bool,
}

#[derive(Args, Clone, Debug)]
struct EditOptions {
    /// Id or title of card to edit.
    #[arg(required = true, value_name = "card")]
    pub card: String,
}

#[derive(Args, Clone, Debug)]
struct RemoteOptions {
    /// Board to synchronize instead of current board.
    #[arg(value_name = "board_id")]
    pub board_id: Option<String>,

    /// Remote to synchronize with.
    #[arg(short, long, value_name = "remote", default_value = "origin")]
    pub remote: String,
}

fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_board(opts: BoardOptions) -> Result<()> {
    let mut store = BoardStore::open_default()?;
    if opts.delete {
        let board = match opts.board_id {
            Some(board_id) => store.get_required(&board_id)?,
            None => store.current_required()?,
        };
        let board_id = board.id().to_string();
        let confirmed = opts.yes
            || Confirm::new(&format!("delete board {board_id:?} along with its history?"))
                .with_default(false)
                .prompt()?;
        if !confirmed {
            info!("kept board {board_id:?}");
            return Ok(());
        }

        return Ok(store.delete(board)?);
    }

    let Some(board_id) = opts.board_id else {
        return show_boards(&mut store);
    };

    store.create(&board_id, opts.repo.as_deref())?;
    if store.current().is_none() {
        store.select(&board_id)?;
        info!("selected board {board_id:?}");
    }

    Ok(())
}

fn run_switch(opts: SwitchOptions) -> Result<()> {
    let mut store = BoardStore::open_default()?;
    let board = store.switch(&opts.board_id)?;
    info!("switched to board {:?}", board.id());

    Ok(())
}

fn run_list(opts: ListOptions) -> Result<()> {
    let mut store = BoardStore::open_default()?;
    let mut board = store.current_required()?;
    match opts.list_id {
        Some(list_id) if opts.delete => board.delete_list(&list_id)?,
        Some(list_id) => {
            board.create_list(&list_id)?;
        }
        None => show_board(&board)?,
    }

    Ok(())
}

fn run_card(opts: CardOptions) -> Result<()> {
    let mut store = BoardStore::open_default()?;
    let mut board = store.current_required()?;
    let Some(query) = opts.card else {
        return show_board(&board);
    };

    if opts.delete {
        board.delete_card(&query)?;
    } else if let Some(list_id) = opts.list {
        let card = board.create_card(&list_id, &query)?;
        println!("{}", card.short_id());
    } else {
        show_card(&board.find_card(&query)?);
    }

    Ok(())
}

fn run_edit(opts: EditOptions) -> Result<()> {
    let mut store = BoardStore::open_default()?;
    let mut board = store.current_required()?;
    let mut card = board.find_card(&opts.card)?;

    let draft = env::temp_dir().join(format!("kood-{}.md", card.short_id()));
    write(&draft, card.to_draft())?;
    let edited = open_editor(&draft).and_then(|()| Ok(read_to_string(&draft)?));
    remove_file(&draft)?;

    if !card.apply_draft(&edited?)? {
        info!("editor exited without changes to card {:?}", card.title());
        return Ok(());
    }

    board.update_card(&card)?;
    info!("updated card {:?}", card.title());

    Ok(())
}

fn run_remote(kind: SyncKind, opts: RemoteOptions) -> Result<()> {
    let mut store = BoardStore::open_default()?;
    let board = match opts.board_id {
        Some(board_id) => store.get_required(&board_id)?,
        None => store.current_required()?,
    };

    let progress = Progress::start(format!("{kind} {:?} with {:?}", board.id(), opts.remote))?;
    let output = match kind {
        SyncKind::Pull => sync::pull(&board, &opts.remote),
        SyncKind::Push => sync::push(&board, &opts.remote),
        SyncKind::Sync => sync::sync(&board, &opts.remote),
    };
    let synced = output
        .map_err(anyhow::Error::from)
        .and_then(|output| Ok(classify(kind, &output).into_result(&board, &opts.remote)?));

    match synced {
        Ok(Synced::UpToDate) => progress.ok(format!("board {:?} is already up to date", board.id())),
        Ok(Synced::Updated) => progress.ok(format!("board {:?} is synchronized", board.id())),
        Err(err) => {
            progress.fail(format!("{kind} of board {:?} failed", board.id()))?;
            Err(err)
        }
    }
}

/// Spinner shown while git talks to a remote.
struct Progress {
    bar: ProgressBar,
    color: bool,
}

impl Progress {
    fn start(message: String) -> Result<Self> {
        let color = env::var_os("NO_COLOR").is_none();
        let bar = ProgressBar::new_spinner();
        bar.set_style(Self::style(color, "\x1b[33m{spinner}\x1b[0m {wide_msg}", "{spinner} {wide_msg}")?
            .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"]));
        bar.enable_steady_tick(Duration::from_millis(80));
        bar.set_message(message);

        Ok(Self { bar, color })
    }

    fn ok(self, message: String) -> Result<()> {
        self.bar
            .set_style(Self::style(self.color, "\x1b[32m✔\x1b[0m {wide_msg}", "ok {wide_msg}")?);
        self.bar.finish_with_message(message);
        Ok(())
    }

    fn fail(self, message: String) -> Result<()> {
        self.bar
            .set_style(Self::style(self.color, "\x1b[31m✘\x1b[0m {wide_msg}", "failed {wide_msg}")?);
        self.bar.abandon_with_message(message);
        Ok(())
    }

    fn style(color: bool, colored: &str, plain: &str) -> Result<ProgressStyle> {
        Ok(ProgressStyle::with_template(if color { colored } else { plain })?)
    }
}

fn show_boards(store: &mut BoardStore) -> Result<()> {
    let current = store.config().current_board_id().map(str::to_string);
    let ids = store.boards()?;
    let width = ids.iter().map(String::len).max().unwrap_or_default();
    for id in ids {
        let marker = if current.as_deref() == Some(id.as_str()) { "*" } else { " " };
        let visibility = if store.get_required(&id)?.is_published()? {
            "(shared)"
        } else {
            "(private)"
        };
        println!("{marker} {id:<width$}  {visibility}");
    }

    Ok(())
}

fn show_board(board: &Board<Git2Backend>) -> Result<()> {
    println!("{}", board.id());
    for list in board.lists()? {
        println!("  {}", list.id());
        for card in board.list_cards(&list)? {
            println!("    {}  {}", card.short_id(), card.title());
        }
    }

    Ok(())
}

fn show_card(card: &Card) {
    println!("{}", card.title());
    println!("id: {}", card.id());
    println!("created: {}", card.created_at().format("%Y-%m-%d %H:%M"));
    if !card.content().is_empty() {
        println!("\n{}", card.content());
    }
}

fn open_editor(path: &Path) -> Result<()> {
    let editor = config::editor()?;
    let mut words = editor.split_whitespace();
    let Some(program) = words.next() else {
        bail!("no editor configured, set KOOD_EDITOR or EDITOR");
    };

    let status = Process::new(program).args(words).arg(path).status()?;
    if !status.success() {
        bail!("editor {editor:?} exited with {status}");
    }

    Ok(())
}
