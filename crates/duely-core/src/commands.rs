use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{format_due_date, parse_due_date, today};
use crate::gateway::{Gateway, ItemStore};
use crate::notify::{self, Notifier};
use crate::render::Renderer;
use crate::session::{Outcome, Session};
use crate::urgency::Thresholds;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "list", "edit", "delete", "shell", "_show", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(gateway, cfg, renderer, inv))]
pub fn dispatch(
    gateway: &Gateway,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "help" => return cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        "_show" => return cmd_show(cfg),
        _ => {}
    }

    run_session_command(gateway, cfg, renderer, notify::from_config(cfg), today(), inv)
}

/// Runs one item command inside a session seeded from, and saved back to,
/// the notification ledger.
fn run_session_command<N: Notifier>(
    gateway: &Gateway,
    cfg: &Config,
    renderer: &Renderer,
    notifier: N,
    today: NaiveDate,
    inv: Invocation,
) -> anyhow::Result<()> {
    let notified = gateway
        .with_store(|store| store.load_notified())
        .context("failed to load notification ledger")?;
    let mut session = Session::new(gateway, notifier, today)
        .with_thresholds(Thresholds::from_config(cfg))
        .with_notified(notified);
    session.refresh();

    let result = match inv.command.as_str() {
        "add" => cmd_add(&mut session, &inv.command_args),
        "list" => cmd_list(&mut session, renderer),
        "edit" => cmd_edit(&mut session, &inv.command_args),
        "delete" => cmd_delete(&mut session, &inv.command_args),
        "shell" => cmd_shell(&mut session, renderer),
        other => Err(anyhow!("unknown command: {other}")),
    };

    let saved = gateway
        .with_store(|store| store.save_notified(session.notified()))
        .context("failed to persist notification ledger");
    result?;
    saved
}

/// Splits `due:<date>` modifiers from the words that make up a name.
pub fn parse_name_and_due(
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<(String, Option<NaiveDate>)> {
    let mut words = Vec::new();
    let mut due = None;
    for arg in args {
        if let Some(expr) = arg.strip_prefix("due:") {
            due = Some(parse_due_date(expr, today)?);
        } else {
            words.push(arg.as_str());
        }
    }
    Ok((words.join(" "), due))
}

fn parse_id(raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| anyhow!("invalid item id: {raw}"))
}

fn failure_error<S: ItemStore, N: Notifier>(session: &mut Session<S, N>) -> anyhow::Error {
    match session.take_failure() {
        Some(failure) => anyhow!("{failure}"),
        None => anyhow!("operation failed"),
    }
}

#[instrument(skip(session, args))]
fn cmd_add<S: ItemStore, N: Notifier>(
    session: &mut Session<S, N>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command add");

    let (name, due) = parse_name_and_due(args, session.today())?;
    session.set_name(name);
    if let Some(due) = due {
        session.open_date_picker();
        session.pick_date(due);
        session.confirm_date();
    }

    match session.submit() {
        Outcome::Applied(item) => {
            println!(
                "Created item {} due {}.",
                item.id,
                format_due_date(item.due_date)
            );
            Ok(())
        }
        Outcome::Disabled => Err(anyhow!("name must not be blank")),
        Outcome::Failed => Err(failure_error(session)),
    }
}

#[instrument(skip(session, renderer))]
fn cmd_list<S: ItemStore, N: Notifier>(
    session: &mut Session<S, N>,
    renderer: &Renderer,
) -> anyhow::Result<()> {
    info!("command list");
    session.refresh();
    renderer.print_item_table(&session.rows())
}

#[instrument(skip(session, args))]
fn cmd_edit<S: ItemStore, N: Notifier>(
    session: &mut Session<S, N>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command edit");

    let (id_arg, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("edit requires an item id"))?;
    let id = parse_id(id_arg)?;
    let (name, due) = parse_name_and_due(rest, session.today())?;
    if name.is_empty() && due.is_none() {
        return Err(anyhow!("edit requires a new name or due:<date>"));
    }

    if !session.open_editor(id) {
        return Err(anyhow!("no item with id {id}"));
    }
    if !name.is_empty() {
        session.edit_name(id, name);
    }
    if let Some(due) = due {
        session.open_edit_date_picker(id);
        session.pick_edit_date(id, due);
        session.confirm_edit_date(id);
    }

    match session.save(id) {
        Outcome::Applied(item) => {
            println!(
                "Modified item {} ({}, due {}).",
                item.id,
                item.name,
                format_due_date(item.due_date)
            );
            Ok(())
        }
        Outcome::Disabled => Err(anyhow!("name must not be blank")),
        Outcome::Failed => Err(failure_error(session)),
    }
}

#[instrument(skip(session, args))]
fn cmd_delete<S: ItemStore, N: Notifier>(
    session: &mut Session<S, N>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command delete");

    if args.is_empty() {
        return Err(anyhow!("delete requires at least one item id"));
    }
    let ids = args
        .iter()
        .map(|raw| parse_id(raw))
        .collect::<anyhow::Result<Vec<u64>>>()?;

    let mut failed = Vec::new();
    for id in ids {
        match session.delete(id) {
            Outcome::Applied(()) => println!("Deleted item {id}."),
            Outcome::Disabled => println!("No item with id {id}."),
            Outcome::Failed => failed.push(failure_error(session).to_string()),
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(failed.join("; ")))
    }
}

#[instrument(skip(session, renderer))]
fn cmd_shell<S: ItemStore, N: Notifier>(
    session: &mut Session<S, N>,
    renderer: &Renderer,
) -> anyhow::Result<()> {
    info!("command shell");
    let stdin = io::stdin();
    let prompt = stdin.is_terminal();
    run_shell(session, renderer, stdin.lock(), io::stdout().lock(), prompt)
}

const SHELL_HELP: &str = "\
name <text>    set the name of the item to add
date           open the date picker for the item to add
pick <date>    choose a date in the open picker
ok | cancel    close the open picker, keeping or dropping the choice
add            add the item
edit <id>      open the editor for an item
rename <text>  change the name in the editor
redate         open the date picker in the editor
save           save the editor
discard        close the editor without saving
delete <id>    delete an item
list           show all items
quit           leave the shell";

/// Line-driven front end over a [`Session`].
pub fn run_shell<S, N, R, W>(
    session: &mut Session<S, N>,
    renderer: &Renderer,
    input: R,
    mut output: W,
    prompt: bool,
) -> anyhow::Result<()>
where
    S: ItemStore,
    N: Notifier,
    R: BufRead,
    W: Write,
{
    let mut active: Option<u64> = None;
    let mut lines = input.lines();

    loop {
        if prompt {
            write!(output, "duely> ")?;
            output.flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read shell input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        session.refresh();
        if active.is_some_and(|id| session.item(id).is_none()) {
            active = None;
        }

        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        debug!(word, rest, "shell command");

        match word {
            "quit" | "exit" => break,
            "help" => writeln!(output, "{SHELL_HELP}")?,
            "list" => renderer.write_item_table(&mut output, &session.rows())?,
            "name" => session.set_name(rest),
            "date" => {
                session.open_date_picker();
                writeln!(
                    output,
                    "Picking date (currently {}).",
                    format_due_date(session.form().due_date)
                )?;
            }
            "redate" => match active {
                Some(id) => {
                    session.open_edit_date_picker(id);
                    writeln!(output, "Picking date for item {id}.")?;
                }
                None => writeln!(output, "No item is being edited.")?,
            },
            "pick" => {
                let date = match parse_due_date(rest, session.today()) {
                    Ok(date) => date,
                    Err(err) => {
                        writeln!(output, "{err:#}")?;
                        continue;
                    }
                };
                let picked = match active {
                    Some(id)
                        if session
                            .editor(id)
                            .is_some_and(|draft| draft.picker.is_some()) =>
                    {
                        session.pick_edit_date(id, date)
                    }
                    _ => session.pick_date(date),
                };
                if picked {
                    writeln!(output, "Selected {}.", format_due_date(date))?;
                } else {
                    writeln!(output, "No date picker is open.")?;
                }
            }
            "ok" | "cancel" => {
                let editor_picking = active
                    .and_then(|id| session.editor(id))
                    .is_some_and(|draft| draft.picker.is_some());
                match (active, editor_picking, word) {
                    (Some(id), true, "ok") => session.confirm_edit_date(id),
                    (Some(id), true, _) => session.cancel_edit_date(id),
                    (_, _, "ok") => session.confirm_date(),
                    _ => session.cancel_date(),
                }
            }
            "add" => match session.submit() {
                Outcome::Applied(item) => writeln!(output, "Created item {}.", item.id)?,
                Outcome::Disabled => writeln!(
                    output,
                    "Add is disabled: enter a name and close the date picker."
                )?,
                Outcome::Failed => report_failure(session, &mut output)?,
            },
            "edit" => {
                let id = match parse_id(rest) {
                    Ok(id) => id,
                    Err(err) => {
                        writeln!(output, "{err}")?;
                        continue;
                    }
                };
                if let Some(current) = active
                    && current != id
                {
                    writeln!(output, "Finish editing item {current} first (save or discard).")?;
                    continue;
                }
                if session.open_editor(id) {
                    active = Some(id);
                    if let Some(draft) = session.editor(id) {
                        renderer.write_editor(&mut output, id, draft)?;
                    }
                } else {
                    writeln!(output, "No item with id {id}.")?;
                }
            }
            "rename" => match active {
                Some(id) => {
                    session.edit_name(id, rest);
                }
                None => writeln!(output, "No item is being edited.")?,
            },
            "save" => match active {
                Some(id) => match session.save(id) {
                    Outcome::Applied(item) => {
                        active = None;
                        writeln!(output, "Saved item {}.", item.id)?;
                    }
                    Outcome::Disabled => writeln!(
                        output,
                        "Save is disabled: enter a name and close the date picker."
                    )?,
                    Outcome::Failed => report_failure(session, &mut output)?,
                },
                None => writeln!(output, "No item is being edited.")?,
            },
            "discard" => match active.take() {
                Some(id) => {
                    session.cancel_edit(id);
                    writeln!(output, "Discarded changes to item {id}.")?;
                }
                None => writeln!(output, "No item is being edited.")?,
            },
            "delete" => {
                let id = match parse_id(rest) {
                    Ok(id) => id,
                    Err(err) => {
                        writeln!(output, "{err}")?;
                        continue;
                    }
                };
                match session.delete(id) {
                    Outcome::Applied(()) => {
                        if active == Some(id) {
                            active = None;
                        }
                        writeln!(output, "Deleted item {id}.")?;
                    }
                    Outcome::Disabled => writeln!(output, "No item with id {id}.")?,
                    Outcome::Failed => report_failure(session, &mut output)?,
                }
            }
            other => writeln!(output, "Unknown command: {other} (try help)")?,
        }
    }

    Ok(())
}

fn report_failure<S: ItemStore, N: Notifier, W: Write>(
    session: &mut Session<S, N>,
    output: &mut W,
) -> anyhow::Result<()> {
    if let Some(failure) = session.take_failure() {
        warn!(%failure, "shell operation failed");
        writeln!(output, "{failure}")?;
    }
    Ok(())
}

#[instrument(skip(cfg))]
fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (key, value) in entries {
        println!("{key}={value}");
    }
    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "\
usage: duely [-v|-q] [--rc KEY=VALUE] [--duelyrc PATH] [--data DIR] <command> [args]

commands:
  add <name...> [due:<date>]          add an item (date defaults to today)
  list                                show items by due date
  edit <id> [<name...>] [due:<date>]  change an item's name and/or date
  delete <id>...                      delete items
  shell                               interactive session
  _show                               print the effective configuration
  help | version

dates: today, tomorrow, yesterday, monday..sunday, january..december,
       +Nd/-Nd, +Nw/-Nw, +Nm/-Nm, YYYY, YYYY-MM-DD"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;

    use tempfile::tempdir;

    use super::*;
    use crate::error::NotifyError;
    use crate::notify::DisabledNotifier;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn abbreviations_resolve_uniquely() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("li", &known), Some("list"));
        assert_eq!(expand_command_abbrev("sh", &known), Some("shell"));
        assert_eq!(expand_command_abbrev("xyz", &known), None);
    }

    #[test]
    fn name_and_due_are_split() {
        let today = date(2026, 2, 17);
        let (name, due) =
            parse_name_and_due(&args(&["Renew", "due:2026-05-01", "passport"]), today)
                .expect("parse");
        assert_eq!(name, "Renew passport");
        assert_eq!(due, Some(date(2026, 5, 1)));

        let (name, due) = parse_name_and_due(&args(&["Milk"]), today).expect("parse");
        assert_eq!(name, "Milk");
        assert_eq!(due, None);

        assert!(parse_name_and_due(&args(&["due:whenever"]), today).is_err());
    }

    #[derive(Default)]
    struct Recorder {
        bodies: RefCell<Vec<String>>,
    }

    impl Notifier for Recorder {
        fn notify(&self, _title: &str, body: &str) -> Result<(), NotifyError> {
            self.bodies.borrow_mut().push(body.to_string());
            Ok(())
        }
    }

    fn invocation(command: &str, words: &[&str]) -> Invocation {
        Invocation {
            command: command.to_string(),
            command_args: args(words),
        }
    }

    #[test]
    fn ledger_carries_across_invocations() {
        let temp = tempdir().expect("tempdir");
        let gateway = Gateway::open(temp.path()).expect("open");
        let cfg = Config::defaults();
        let renderer = Renderer::plain();
        let today = date(2026, 2, 17);

        let first = Recorder::default();
        run_session_command(
            &gateway,
            &cfg,
            &renderer,
            &first,
            today,
            invocation("add", &["Milk", "due:+10d"]),
        )
        .expect("add");
        assert_eq!(*first.bodies.borrow(), vec!["Milk is about to expire".to_string()]);

        let saved = gateway
            .with_store(|store| store.load_notified())
            .expect("load ledger");
        assert_eq!(saved.len(), 1);

        let second = Recorder::default();
        run_session_command(
            &gateway,
            &cfg,
            &renderer,
            &second,
            today + chrono::Duration::days(1),
            invocation("list", &[]),
        )
        .expect("list");
        assert!(second.bodies.borrow().is_empty());
    }

    #[test]
    fn cleared_ledger_notifies_again() {
        let temp = tempdir().expect("tempdir");
        let gateway = Gateway::open(temp.path()).expect("open");
        let cfg = Config::defaults();
        let renderer = Renderer::plain();
        let today = date(2026, 2, 17);

        run_session_command(
            &gateway,
            &cfg,
            &renderer,
            DisabledNotifier,
            today,
            invocation("add", &["Milk", "due:+10d"]),
        )
        .expect("add");
        gateway
            .with_store(|store| store.save_notified(&Default::default()))
            .expect("clear ledger");

        let again = Recorder::default();
        run_session_command(
            &gateway,
            &cfg,
            &renderer,
            &again,
            today,
            invocation("list", &[]),
        )
        .expect("list");
        assert_eq!(again.bodies.borrow().len(), 1);
    }

    #[test]
    fn shell_drives_add_edit_delete() {
        let temp = tempdir().expect("tempdir");
        let gateway = Gateway::open(temp.path()).expect("open");
        let mut session = Session::new(&gateway, DisabledNotifier, date(2026, 2, 17));
        session.refresh();

        let script = "\
add
name Passport
date
pick 2026-09-01
ok
add
name Milk
date
pick +3d
cancel
add
edit 2
rename Oat milk
save
delete 9
list
quit
name never reached
";
        let mut out = Vec::new();
        run_shell(
            &mut session,
            &Renderer::plain(),
            Cursor::new(script),
            &mut out,
            false,
        )
        .expect("shell");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("Add is disabled"));
        assert!(text.contains("Created item 1."));
        assert!(text.contains("Created item 2."));
        assert!(text.contains("Saved item 2."));
        assert!(text.contains("No item with id 9."));
        assert!(text.contains("Oat milk"));
        assert_eq!(session.form().name, "");

        let items = gateway.snapshot();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Passport");
        // cancelled picker leaves the date from the previous add in place
        assert_eq!(items[1].name, "Oat milk");
        assert_eq!(items[1].due_date, date(2026, 9, 1));
    }

    #[test]
    fn shell_allows_one_editor_at_a_time() {
        let temp = tempdir().expect("tempdir");
        let gateway = Gateway::open(temp.path()).expect("open");
        let mut session = Session::new(&gateway, DisabledNotifier, date(2026, 2, 17));
        session.refresh();

        let script = "\
name A
add
name B
add
edit 1
edit 2
redate
pick 2027-01-01
ok
save
discard
";
        let mut out = Vec::new();
        run_shell(
            &mut session,
            &Renderer::plain(),
            Cursor::new(script),
            &mut out,
            false,
        )
        .expect("shell");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("Finish editing item 1 first"));
        assert!(text.contains("Saved item 1."));
        assert!(text.contains("No item is being edited."));
        assert_eq!(
            session.item(1).map(|item| item.due_date),
            Some(date(2027, 1, 1))
        );
    }
}
