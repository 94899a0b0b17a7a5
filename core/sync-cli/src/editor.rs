//! Editor context: a line-oriented table editor over the shared transport.
//!
//! stdin is read on a helper thread so the main loop can keep draining
//! messages from the parent and writing heartbeats while waiting for input.

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use measview_core::editor::{parse_cell_input, write_heartbeat};
use measview_core::record::cell_text;
use measview_core::{
    poll_liveness, AlwaysConfirm, CellKey, Confirm, ConfirmPrompt, EditorReaction, EditorSession,
    FileTransport, ProcessProbe, SyncConfig, SyncError, Transport,
};
use measview_protocol::ContextRole;
use tracing::{debug, warn};

const TICK: Duration = Duration::from_millis(250);
const INIT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Show,
    Edit { row: usize, field: String, value: String },
    Delete { row: usize },
    Restore,
    Copy { row: usize },
    Revert,
    Sort { field: String },
    Filter { field: String, value: String },
    Unfilter { field: Option<String> },
    Options,
    Summary,
    Save,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  show                       print visible rows
  edit ROW FIELD VALUE...    change a cell (VALUE is JSON or text)
  delete ROW                 flag a row for deletion
  restore                    undo all pending deletions
  copy ROW                   append a copy of a row
  revert                     discard every change since the last save
  sort FIELD                 sort by FIELD (again to reverse)
  filter FIELD VALUE...      show rows whose FIELD equals VALUE
  unfilter [FIELD]           clear one filter, or all
  options                    distinct values per column
  summary                    pending changes
  save                       publish changes to the parent
  quit                       close the editor";

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Err("empty command".to_string());
    };
    let rest: Vec<&str> = parts.collect();

    let row_at = |index: usize| -> Result<usize, String> {
        rest.get(index)
            .ok_or_else(|| "missing ROW".to_string())?
            .parse::<usize>()
            .map_err(|_| format!("invalid row: {}", rest[index]))
    };
    let field_at = |index: usize| -> Result<String, String> {
        rest.get(index)
            .map(|field| field.to_string())
            .ok_or_else(|| "missing FIELD".to_string())
    };

    match name {
        "show" | "ls" => Ok(Command::Show),
        "edit" => Ok(Command::Edit {
            row: row_at(0)?,
            field: field_at(1)?,
            value: rest.get(2..).map(|words| words.join(" ")).unwrap_or_default(),
        }),
        "delete" | "rm" => Ok(Command::Delete { row: row_at(0)? }),
        "restore" => Ok(Command::Restore),
        "copy" | "cp" => Ok(Command::Copy { row: row_at(0)? }),
        "revert" => Ok(Command::Revert),
        "sort" => Ok(Command::Sort { field: field_at(0)? }),
        "filter" => Ok(Command::Filter {
            field: field_at(0)?,
            value: rest.get(1..).map(|words| words.join(" ")).unwrap_or_default(),
        }),
        "unfilter" => Ok(Command::Unfilter {
            field: rest.first().map(|field| field.to_string()),
        }),
        "options" => Ok(Command::Options),
        "summary" | "status" => Ok(Command::Summary),
        "save" => Ok(Command::Save),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command: {} (try help)", other)),
    }
}

/// Writes `editorHeartbeat` through its own store handle, so a pending prompt
/// can keep beating while the session is borrowed.
struct Heartbeat {
    transport: FileTransport,
    every: Duration,
    last: Option<Instant>,
}

impl Heartbeat {
    fn new(transport: FileTransport, every: Duration) -> Self {
        Self {
            transport,
            every,
            last: None,
        }
    }

    fn tick(&mut self) {
        if self.last.is_some_and(|at| at.elapsed() < self.every) {
            return;
        }
        match write_heartbeat(&mut self.transport, Utc::now()) {
            Ok(()) => self.last = Some(Instant::now()),
            Err(err) => warn!(error = %err, "Failed to write heartbeat"),
        }
    }
}

/// Asks on stderr and reads the answer from the shared input channel,
/// heartbeating while the user thinks.
struct PromptConfirm<'a> {
    lines: &'a Receiver<String>,
    heartbeat: &'a mut Heartbeat,
}

impl Confirm for PromptConfirm<'_> {
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool {
        eprintln!("{} [y/N]", prompt);
        loop {
            self.heartbeat.tick();
            match self.lines.recv_timeout(TICK) {
                Ok(answer) => return matches!(answer.trim(), "y" | "Y" | "yes" | "YES"),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

/// Waits on the parent process from a helper thread; `is_gone` flips once it
/// exits. Dropping the watch stops the thread.
struct ParentWatch {
    gone: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl ParentWatch {
    fn spawn(pid: u32, interval: Duration) -> Self {
        let gone = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));
        let (flag, stop) = (Arc::clone(&gone), Arc::clone(&cancel));
        thread::spawn(move || {
            let parent = ProcessProbe::new(pid);
            poll_liveness(
                interval,
                || parent.is_running(),
                || flag.store(true, Ordering::Relaxed),
                &stop,
            );
            debug!(pid, "Parent watch stopped");
        });
        Self { gone, cancel }
    }

    fn is_gone(&self) -> bool {
        self.gone.load(Ordering::Relaxed)
    }
}

impl Drop for ParentWatch {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

pub fn run(
    config: &SyncConfig,
    dir: &Path,
    parent_pid: Option<u32>,
    assume_yes: bool,
) -> Result<(), String> {
    let mut transport = FileTransport::open(dir, ContextRole::Child)?;
    let mut session = EditorSession::from_config(config);
    load(&mut session, &mut transport, config)?;
    print_rows(&session);

    let mut heartbeat = Heartbeat::new(
        FileTransport::open(dir, ContextRole::Child)?,
        config.liveness.heartbeat_interval(),
    );
    let lines = spawn_stdin_reader();
    let parent = parent_pid.map(|pid| ParentWatch::spawn(pid, config.liveness.poll_interval()));

    edit_loop(
        &mut session,
        &mut transport,
        &mut heartbeat,
        &lines,
        parent.as_ref(),
        assume_yes,
    );

    session.teardown(&mut transport)?;
    Ok(())
}

/// Runs until quit, end of input, parent exit or a failed poll. Failures are
/// logged here; teardown is the caller's.
fn edit_loop(
    session: &mut EditorSession,
    transport: &mut FileTransport,
    heartbeat: &mut Heartbeat,
    lines: &Receiver<String>,
    parent: Option<&ParentWatch>,
    assume_yes: bool,
) {
    loop {
        heartbeat.tick();

        let events = match transport.poll_events() {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "Failed to poll parent; closing editor");
                eprintln!("Lost contact with parent: {}", err);
                break;
            }
        };
        for event in events {
            match session.handle_event(transport, event) {
                Ok(reaction) => report(&reaction, session),
                Err(err) => warn!(error = %err, "Failed to handle parent message"),
            }
        }

        if parent.is_some_and(ParentWatch::is_gone) {
            eprintln!("Parent exited; closing editor");
            break;
        }

        let line = match lines.recv_timeout(TICK) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                eprintln!("{}", message);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        let mut prompt = PromptConfirm {
            lines,
            heartbeat: &mut *heartbeat,
        };
        let mut yes = AlwaysConfirm;
        let confirm: &mut dyn Confirm = if assume_yes { &mut yes } else { &mut prompt };
        if let Err(err) = execute(session, transport, confirm, command) {
            eprintln!("{}", err);
        }
    }
}

/// Loads from the store; if the parent has not published yet, waits briefly
/// for `INIT_DATA`.
fn load(
    session: &mut EditorSession,
    transport: &mut FileTransport,
    config: &SyncConfig,
) -> Result<(), String> {
    match session.load(transport, &config.editor.candidate_keys) {
        Ok(_) => return Ok(()),
        Err(SyncError::Load { .. }) => {}
        Err(err) => return Err(err.to_string()),
    }

    let deadline = Instant::now() + INIT_WAIT;
    while Instant::now() < deadline {
        for event in transport.poll_events()? {
            if let EditorReaction::Loaded { .. } = session.handle_event(transport, event)? {
                return Ok(());
            }
        }
        thread::sleep(TICK);
    }
    Err(SyncError::Load {
        candidates: config.editor.candidate_keys.clone(),
    }
    .to_string())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });
    receiver
}

fn execute(
    session: &mut EditorSession,
    transport: &mut FileTransport,
    confirm: &mut dyn Confirm,
    command: Command,
) -> Result<(), SyncError> {
    match command {
        Command::Show => print_rows(session),
        Command::Edit { row, field, value } => {
            session.edit_cell(row, &field, parse_cell_input(&value))?;
            let key = CellKey::new(row, field);
            if let Some(message) = session.validation_errors().get(&key) {
                eprintln!("{}: {}", key, message);
            }
        }
        Command::Delete { row } => {
            if session.delete_row(row, confirm)? {
                println!("row {} marked for deletion", row);
            }
        }
        Command::Restore => {
            if session.restore_deleted(confirm)? {
                print_rows(session);
            }
        }
        Command::Copy { row } => {
            let index = session.copy_row(row)?;
            println!("copied row {} to {}", row, index);
        }
        Command::Revert => {
            if session.revert_changes(confirm)? {
                print_rows(session);
            }
        }
        Command::Sort { field } => {
            let direction = session.sort_by(&field);
            println!("sorted by {} {}", field, direction.as_str());
            print_rows(session);
        }
        Command::Filter { field, value } => {
            session.set_filter(&field, &value);
            print_rows(session);
        }
        Command::Unfilter { field } => {
            match field {
                Some(field) => session.clear_filter(&field),
                None => session.clear_all_filters(),
            }
            print_rows(session);
        }
        Command::Options => {
            for (column, values) in session.filter_options() {
                let values: Vec<String> = values.iter().map(cell_text).collect();
                println!("{}: {}", column, values.join(" | "));
            }
        }
        Command::Summary => {
            let summary = session.change_summary();
            println!(
                "state={} changed={} deleted={} added={} errors={}",
                session.state().name(),
                summary.changed_cells,
                summary.pending_deletions,
                summary.added_rows,
                summary.validation_errors
            );
        }
        Command::Save => {
            let records = session.save(transport)?;
            println!("saved {} rows", records.len());
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn report(reaction: &EditorReaction, session: &EditorSession) {
    match reaction {
        EditorReaction::Ignored => {}
        EditorReaction::Loaded { rows } | EditorReaction::Refreshed { rows } => {
            println!("loaded {} rows from parent", rows);
            print_rows(session);
        }
        EditorReaction::Saved { rows } => println!("parent requested data; saved {} rows", rows),
        EditorReaction::SaveBlocked { keys } => {
            eprintln!("parent requested data; fix errors first: {}", keys.join(", "))
        }
    }
}

fn print_rows(session: &EditorSession) {
    let columns = session.columns();
    let editable: Vec<String> = columns
        .iter()
        .map(|column| {
            if session.fields().is_mutable(column) {
                format!("{}*", column)
            } else {
                column.clone()
            }
        })
        .collect();
    println!("row\t{}", editable.join("\t"));

    for (index, row) in session.display_rows() {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| row.get(column).map(cell_text).unwrap_or_default())
            .collect();
        println!("{}\t{}", index, cells.join("\t"));
    }

    let summary = session.change_summary();
    if !summary.is_clean() || summary.validation_errors > 0 {
        println!(
            "({} changed, {} deleted, {} added, {} errors)",
            summary.changed_cells,
            summary.pending_deletions,
            summary.added_rows,
            summary.validation_errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use measview_protocol::{keys, MutableFieldSet};
    use serde_json::json;

    #[test]
    fn parses_edit_with_multi_word_value() {
        assert_eq!(
            parse_command("edit 2 measSetComments needs re-run").unwrap(),
            Command::Edit {
                row: 2,
                field: "measSetComments".to_string(),
                value: "needs re-run".to_string(),
            }
        );
    }

    #[test]
    fn parses_unfilter_with_and_without_field() {
        assert_eq!(
            parse_command("unfilter channel").unwrap(),
            Command::Unfilter {
                field: Some("channel".to_string())
            }
        );
        assert_eq!(
            parse_command("unfilter").unwrap(),
            Command::Unfilter { field: None }
        );
    }

    #[test]
    fn rejects_bad_rows_and_unknown_commands() {
        assert!(parse_command("delete x").is_err());
        assert!(parse_command("delete").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn filter_value_may_be_empty() {
        assert_eq!(
            parse_command("filter channel").unwrap(),
            Command::Filter {
                field: "channel".to_string(),
                value: String::new(),
            }
        );
    }

    fn write_dataset(dir: &Path) -> FileTransport {
        let mut parent = FileTransport::create(dir, ContextRole::Parent).unwrap();
        parent
            .put(keys::DATASET, json!([{"groupIndex": 1, "note": "a"}]))
            .unwrap();
        parent
            .put(
                keys::MUTABLE_FIELDS,
                serde_json::to_value(MutableFieldSet::new(["note"])).unwrap(),
            )
            .unwrap();
        parent
    }

    #[test]
    fn prompt_keeps_heartbeating_until_answered() {
        let temp_dir = tempfile::tempdir().unwrap();
        let parent = write_dataset(temp_dir.path());
        let mut heartbeat = Heartbeat::new(
            FileTransport::open(temp_dir.path(), ContextRole::Child).unwrap(),
            Duration::ZERO,
        );
        let (sender, lines) = mpsc::channel();
        let asked_at = Utc::now();
        let answer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(600));
            sender.send("y".to_string()).unwrap();
        });

        let mut prompt = PromptConfirm {
            lines: &lines,
            heartbeat: &mut heartbeat,
        };
        assert!(prompt.confirm(&ConfirmPrompt::RestoreDeleted { count: 1 }));
        answer.join().unwrap();

        let beat = parent.get(keys::EDITOR_HEARTBEAT).unwrap().unwrap();
        let beat: DateTime<Utc> = beat.as_str().unwrap().parse().unwrap();
        assert!(beat - asked_at >= chrono::Duration::milliseconds(400));
    }

    #[test]
    fn prompt_declines_when_input_closes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let _parent = write_dataset(temp_dir.path());
        let mut heartbeat = Heartbeat::new(
            FileTransport::open(temp_dir.path(), ContextRole::Child).unwrap(),
            Duration::from_secs(60),
        );
        let (sender, lines) = mpsc::channel::<String>();
        drop(sender);

        let mut prompt = PromptConfirm {
            lines: &lines,
            heartbeat: &mut heartbeat,
        };
        assert!(!prompt.confirm(&ConfirmPrompt::RestoreDeleted { count: 1 }));
    }

    #[test]
    fn failed_poll_ends_loop_and_teardown_still_flushes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let parent = write_dataset(temp_dir.path());
        let config = SyncConfig::default();
        let mut child = FileTransport::open(temp_dir.path(), ContextRole::Child).unwrap();
        let mut session = EditorSession::from_config(&config);
        session.load(&mut child, &config.editor.candidate_keys).unwrap();
        session.edit_cell(0, "note", json!("b")).unwrap();

        let inbox = temp_dir.path().join("inbox-child.jsonl");
        fs_err::remove_file(&inbox).unwrap();
        fs_err::create_dir(&inbox).unwrap();

        let mut heartbeat = Heartbeat::new(
            FileTransport::open(temp_dir.path(), ContextRole::Child).unwrap(),
            Duration::from_secs(60),
        );
        let (_sender, lines) = mpsc::channel::<String>();
        edit_loop(&mut session, &mut child, &mut heartbeat, &lines, None, true);

        session.teardown(&mut child).unwrap();
        assert_eq!(
            parent.get(keys::DATASET).unwrap(),
            Some(json!([{"groupIndex": 1, "note": "b"}]))
        );
        assert_eq!(parent.get(keys::SESSION_OPEN).unwrap(), Some(json!("closed")));
    }

    #[test]
    fn parent_watch_notices_exit() {
        let mut exited = std::process::Command::new("true").spawn().unwrap();
        let pid = exited.id();
        exited.wait().unwrap();

        let watch = ParentWatch::spawn(pid, Duration::from_millis(10));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !watch.is_gone() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(watch.is_gone());

        let alive = ParentWatch::spawn(std::process::id(), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(50));
        assert!(!alive.is_gone());
    }
}
