//! Built-in commands.

use crate::error::{Code, Exception, TclResult};
use crate::expr::{eval_bool, eval_expr, parse_int};
use crate::interp::{AfterToken, Interp};
use crate::list::{merge_list, split_list};
use crate::notifier::{self, EventFlags};
use crate::parser::{Parser, Stop};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

type Builtin = fn(&Interp, &[String]) -> TclResult;

const SAFE_COMMANDS: &[(&str, Builtin)] = &[
    ("after", cmd_after),
    ("append", cmd_append),
    ("break", cmd_break),
    ("catch", cmd_catch),
    ("concat", cmd_concat),
    ("continue", cmd_continue),
    ("error", cmd_error),
    ("expr", cmd_expr),
    ("for", cmd_for),
    ("foreach", cmd_foreach),
    ("global", cmd_global),
    ("if", cmd_if),
    ("incr", cmd_incr),
    ("info", cmd_info),
    ("interp", cmd_interp),
    ("join", cmd_join),
    ("lappend", cmd_lappend),
    ("lindex", cmd_lindex),
    ("list", cmd_list),
    ("llength", cmd_llength),
    ("proc", cmd_proc),
    ("puts", cmd_puts),
    ("return", cmd_return),
    ("set", cmd_set),
    ("split", cmd_split),
    ("string", cmd_string),
    ("subst", cmd_subst),
    ("unset", cmd_unset),
    ("update", cmd_update),
    ("vwait", cmd_vwait),
    ("while", cmd_while),
];

/// Commands hidden from safe interpreters.
const UNSAFE_COMMANDS: &[(&str, Builtin)] = &[
    ("exec", cmd_exec),
    ("file", cmd_file),
    ("source", cmd_source),
];

pub(crate) fn register(interp: &Interp) {
    for (name, f) in SAFE_COMMANDS {
        interp.create_command(name, *f);
    }
    if !interp.is_safe() {
        for (name, f) in UNSAFE_COMMANDS {
            interp.create_command(name, *f);
        }
    }
}

fn check_args(
    args: &[String],
    min: usize,
    max: Option<usize>,
    usage: &str,
) -> Result<(), Exception> {
    let n = args.len() - 1;
    if n < min || max.is_some_and(|max| n > max) {
        return Err(Exception::wrong_args(usage));
    }
    Ok(())
}

fn int_arg(text: &str) -> Result<i64, Exception> {
    parse_int(text.trim())
        .ok_or_else(|| Exception::error(format!("expected integer but got \"{}\"", text)))
}

/// Run a loop body, mapping `break` to `Ok(false)` and `continue` to
/// `Ok(true)`.
fn run_body(interp: &Interp, body: &str) -> Result<bool, Exception> {
    match interp.eval_script(body) {
        Ok(_) => Ok(true),
        Err(e) if e.code == Code::Break => Ok(false),
        Err(e) if e.code == Code::Continue => Ok(true),
        Err(e) => Err(e),
    }
}

/// Minimal glob matching with `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// --- variables -------------------------------------------------------------

fn cmd_set(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(2), "set varName ?newValue?")?;
    match args.get(2) {
        Some(value) => interp.write_var(&args[1], value.as_str()),
        None => interp.read_var(&args[1]),
    }
}

fn cmd_unset(interp: &Interp, args: &[String]) -> TclResult {
    let mut names = &args[1..];
    let mut complain = true;
    if names.first().is_some_and(|a| a == "-nocomplain") {
        complain = false;
        names = &names[1..];
    }
    for name in names {
        if let Err(e) = interp.remove_var(name) {
            if complain {
                return Err(e);
            }
        }
    }
    Ok(String::new())
}

fn cmd_incr(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(2), "incr varName ?increment?")?;
    let by = match args.get(2) {
        Some(text) => int_arg(text)?,
        None => 1,
    };
    let current = if interp.var_exists(&args[1]) {
        int_arg(&interp.read_var(&args[1])?)?
    } else {
        0
    };
    interp.write_var(&args[1], current.wrapping_add(by).to_string())
}

fn cmd_append(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, None, "append varName ?value ...?")?;
    let mut value = interp.read_var(&args[1]).unwrap_or_default();
    for piece in &args[2..] {
        value.push_str(piece);
    }
    interp.write_var(&args[1], value)
}

fn cmd_lappend(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, None, "lappend varName ?value ...?")?;
    let mut elems = match interp.read_var(&args[1]) {
        Ok(existing) => split_list(&existing)?,
        Err(_) => Vec::new(),
    };
    elems.extend(args[2..].iter().cloned());
    interp.write_var(&args[1], merge_list(&elems))
}

fn cmd_global(interp: &Interp, args: &[String]) -> TclResult {
    for name in &args[1..] {
        interp.link_global(name);
    }
    Ok(String::new())
}

// --- lists and strings -----------------------------------------------------

fn cmd_list(_: &Interp, args: &[String]) -> TclResult {
    Ok(merge_list(&args[1..]))
}

fn cmd_llength(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(1), "llength list")?;
    Ok(split_list(&args[1])?.len().to_string())
}

fn cmd_lindex(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(2), "lindex list ?index?")?;
    let Some(index) = args.get(2) else {
        return Ok(args[1].clone());
    };
    let elems = split_list(&args[1])?;
    let index = if let Some(rest) = index.strip_prefix("end") {
        let offset = match rest.strip_prefix('-') {
            Some(n) => int_arg(n)?,
            None if rest.is_empty() => 0,
            None => return Err(Exception::error(format!("bad index \"{}\"", index))),
        };
        elems.len() as i64 - 1 - offset
    } else {
        int_arg(index)?
    };
    Ok(usize::try_from(index)
        .ok()
        .and_then(|i| elems.get(i).cloned())
        .unwrap_or_default())
}

fn cmd_concat(_: &Interp, args: &[String]) -> TclResult {
    Ok(args[1..]
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

fn cmd_join(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(2), "join list ?joinString?")?;
    let sep = args.get(2).map(String::as_str).unwrap_or(" ");
    Ok(split_list(&args[1])?.join(sep))
}

fn cmd_split(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(2), "split string ?splitChars?")?;
    let text = &args[1];
    let seps = args.get(2).map(String::as_str).unwrap_or(" \t\n\r");
    let parts: Vec<String> = if seps.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(|c| seps.contains(c)).map(String::from).collect()
    };
    Ok(merge_list(&parts))
}

fn cmd_string(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 2, None, "string subcommand ?arg ...?")?;
    let sub = args[1].as_str();
    match sub {
        "length" => {
            check_args(args, 2, Some(2), "string length string")?;
            Ok(args[2].chars().count().to_string())
        }
        "equal" => {
            check_args(args, 3, Some(3), "string equal string1 string2")?;
            Ok(i32::from(args[2] == args[3]).to_string())
        }
        "toupper" => Ok(args[2].to_uppercase()),
        "tolower" => Ok(args[2].to_lowercase()),
        "trim" => Ok(args[2].trim().to_string()),
        "match" => {
            check_args(args, 3, Some(3), "string match pattern string")?;
            Ok(i32::from(glob_match(&args[2], &args[3])).to_string())
        }
        _ => Err(Exception::error(format!(
            "unknown or ambiguous subcommand \"{}\": must be equal, length, match, tolower, toupper, or trim",
            sub
        ))),
    }
}

fn cmd_subst(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(1), "subst string")?;
    let parts = Parser::new(&args[1]).parse_parts(Stop::End)?;
    interp.subst_parts(&parts)
}

fn cmd_expr(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, None, "expr arg ?arg ...?")?;
    eval_expr(interp, &args[1..].join(" "))
}

// --- control flow ----------------------------------------------------------

fn cmd_if(interp: &Interp, args: &[String]) -> TclResult {
    let mut i = 1;
    loop {
        let Some(cond) = args.get(i) else {
            return Err(Exception::error(
                "wrong # args: no expression after \"if\" argument",
            ));
        };
        i += 1;
        if args.get(i).is_some_and(|a| a == "then") {
            i += 1;
        }
        let Some(body) = args.get(i) else {
            return Err(Exception::error(format!(
                "wrong # args: no script following \"{}\" argument",
                cond
            )));
        };
        i += 1;
        if eval_bool(interp, cond)? {
            return interp.eval_script(body);
        }
        match args.get(i).map(String::as_str) {
            None => return Ok(String::new()),
            Some("elseif") => i += 1,
            Some("else") => {
                return match args.get(i + 1) {
                    Some(body) => interp.eval_script(body),
                    None => Err(Exception::error(
                        "wrong # args: no script following \"else\" argument",
                    )),
                };
            }
            Some(body) => return interp.eval_script(body),
        }
    }
}

fn cmd_while(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 2, Some(2), "while test command")?;
    while eval_bool(interp, &args[1])? {
        if !run_body(interp, &args[2])? {
            break;
        }
    }
    Ok(String::new())
}

fn cmd_for(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 4, Some(4), "for start test next command")?;
    interp.eval_script(&args[1])?;
    while eval_bool(interp, &args[2])? {
        if !run_body(interp, &args[4])? {
            break;
        }
        interp.eval_script(&args[3])?;
    }
    Ok(String::new())
}

fn cmd_foreach(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 3, Some(3), "foreach varList list command")?;
    let vars = split_list(&args[1])?;
    if vars.is_empty() {
        return Err(Exception::error("foreach varlist is empty"));
    }
    let items = split_list(&args[2])?;
    for chunk in items.chunks(vars.len()) {
        for (i, var) in vars.iter().enumerate() {
            interp.write_var(var, chunk.get(i).cloned().unwrap_or_default())?;
        }
        if !run_body(interp, &args[3])? {
            break;
        }
    }
    Ok(String::new())
}

fn cmd_break(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 0, Some(0), "break")?;
    Err(Exception::brk())
}

fn cmd_continue(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 0, Some(0), "continue")?;
    Err(Exception::cont())
}

fn cmd_return(_: &Interp, args: &[String]) -> TclResult {
    let mut rest = &args[1..];
    let mut code = Code::Return;
    if rest.first().is_some_and(|a| a == "-code") {
        let Some(name) = rest.get(1) else {
            return Err(Exception::wrong_args("return ?-code code? ?result?"));
        };
        code = match Code::parse(name) {
            Some(Code::Ok) => Code::Return,
            Some(code) => code,
            None => {
                return Err(Exception::error(format!(
                    "bad completion code \"{}\": must be ok, error, return, break, continue, or an integer",
                    name
                )));
            }
        };
        rest = &rest[2..];
    }
    if rest.len() > 1 {
        return Err(Exception::wrong_args("return ?-code code? ?result?"));
    }
    Err(Exception::new(code, rest.first().cloned().unwrap_or_default()))
}

fn cmd_error(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(1), "error message")?;
    Err(Exception::error(args[1].clone()))
}

fn cmd_catch(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(2), "catch script ?resultVarName?")?;
    let (code, value) = match interp.eval_script(&args[1]) {
        Ok(value) => (Code::Ok, value),
        Err(e) => (e.code, e.value),
    };
    if let Some(var) = args.get(2) {
        interp.write_var(var, value)?;
    }
    Ok(code.as_i32().to_string())
}

fn cmd_proc(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 3, Some(3), "proc name args body")?;
    let name = args[1].clone();
    let mut params: Vec<(String, Option<String>)> = Vec::new();
    for formal in split_list(&args[2])? {
        let mut fields = split_list(&formal)?.into_iter();
        let Some(param) = fields.next() else {
            return Err(Exception::error(format!(
                "argument with no name in procedure \"{}\"",
                name
            )));
        };
        params.push((param, fields.next()));
    }
    let body = args[3].clone();

    let usage = {
        let mut words = vec![name.clone()];
        for (param, default) in &params {
            words.push(match (param.as_str(), default) {
                ("args", None) => "?arg ...?".to_string(),
                (p, Some(_)) => format!("?{}?", p),
                (p, None) => p.to_string(),
            });
        }
        words.join(" ")
    };

    interp.create_command(&name, move |interp, call| {
        let mut vars = HashMap::new();
        let mut supplied = call[1..].iter();
        for (i, (param, default)) in params.iter().enumerate() {
            if param == "args" && i == params.len() - 1 {
                let rest: Vec<&String> = supplied.by_ref().collect();
                vars.insert(param.clone(), merge_list(&rest));
                continue;
            }
            match (supplied.next(), default) {
                (Some(value), _) => vars.insert(param.clone(), value.clone()),
                (None, Some(default)) => vars.insert(param.clone(), default.clone()),
                (None, None) => return Err(Exception::wrong_args(&usage)),
            };
        }
        if supplied.next().is_some() {
            return Err(Exception::wrong_args(&usage));
        }

        interp.with_frame(vars, || match interp.eval_script(&body) {
            Ok(value) => Ok(value),
            Err(e) => match e.code {
                Code::Return | Code::Ok => Ok(e.value),
                Code::Break | Code::Continue => Err(Exception::error(format!(
                    "invoked \"{}\" outside of a loop",
                    e.code
                ))),
                Code::Error => Err(e),
            },
        })
    });
    Ok(String::new())
}

fn cmd_info(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(2), "info subcommand ?arg?")?;
    match args[1].as_str() {
        "exists" => {
            check_args(args, 2, Some(2), "info exists varName")?;
            Ok(i32::from(interp.var_exists(&args[2])).to_string())
        }
        "commands" => {
            let pattern = args.get(2).map(String::as_str).unwrap_or("*");
            let names: Vec<String> = interp
                .command_names()
                .into_iter()
                .filter(|n| glob_match(pattern, n))
                .collect();
            Ok(merge_list(&names))
        }
        "level" => Ok(interp.level().to_string()),
        other => Err(Exception::error(format!(
            "unknown or ambiguous subcommand \"{}\": must be commands, exists, or level",
            other
        ))),
    }
}

fn cmd_puts(_: &Interp, args: &[String]) -> TclResult {
    let mut rest = &args[1..];
    let mut newline = true;
    if rest.first().is_some_and(|a| a == "-nonewline") {
        newline = false;
        rest = &rest[1..];
    }
    let (channel, text) = match rest {
        [text] => ("stdout", text),
        [channel, text] => (channel.as_str(), text),
        _ => return Err(Exception::wrong_args("puts ?-nonewline? ?channelId? string")),
    };
    let end = if newline { "\n" } else { "" };
    match channel {
        "stdout" => print!("{}{}", text, end),
        "stderr" => eprint!("{}{}", text, end),
        other => {
            return Err(Exception::error(format!(
                "can not find channel named \"{}\"",
                other
            )));
        }
    }
    Ok(String::new())
}

// --- events ----------------------------------------------------------------

fn schedule_after(interp: &Interp, delay: Option<Duration>, script: String) -> String {
    let id = interp.next_after_id();
    let target = interp.clone();
    let fired_id = id.clone();
    let handler = move || {
        target.after_take(&fired_id);
        if target.is_deleted() {
            return;
        }
        if let Err(e) = target.eval_at_global(&script) {
            if target.has_command("bgerror") {
                let _ = target.invoke(&["bgerror", e.value.as_str()]);
            } else {
                warn!(error = %e.value, "background error in after script");
            }
        }
    };
    let token = match delay {
        Some(delay) => AfterToken::Timer(notifier::create_timer_handler(delay, handler)),
        None => AfterToken::Idle(notifier::do_when_idle(handler)),
    };
    interp.after_insert(id.clone(), token);
    id
}

fn cmd_after(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, None, "after option ?arg ...?")?;
    match args[1].as_str() {
        "idle" => {
            check_args(args, 2, None, "after idle script ?script ...?")?;
            Ok(schedule_after(interp, None, args[2..].join(" ")))
        }
        "cancel" => {
            check_args(args, 2, None, "after cancel id|command")?;
            if let Some(token) = interp.after_take(&args[2]) {
                token.cancel();
            }
            Ok(String::new())
        }
        "info" => Ok(merge_list(&interp.after_ids())),
        ms => {
            let ms = int_arg(ms)?.max(0) as u64;
            if args.len() == 2 {
                std::thread::sleep(Duration::from_millis(ms));
                return Ok(String::new());
            }
            Ok(schedule_after(
                interp,
                Some(Duration::from_millis(ms)),
                args[2..].join(" "),
            ))
        }
    }
}

fn cmd_update(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 0, Some(1), "update ?idletasks?")?;
    let flags = match args.get(1).map(String::as_str) {
        None => EventFlags::ALL,
        Some("idletasks") => EventFlags::IDLE,
        Some(other) => {
            return Err(Exception::error(format!(
                "bad option \"{}\": must be idletasks",
                other
            )));
        }
    };
    while notifier::do_one_event(flags | EventFlags::DONT_WAIT) {}
    Ok(String::new())
}

fn cmd_vwait(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(1), "vwait name")?;
    let name = &args[1];
    let before = interp.global_write_count(name);
    while interp.global_write_count(name) == before {
        if interp.is_deleted() {
            return Err(Exception::error(format!(
                "can't wait for variable \"{}\": interpreter deleted",
                name
            )));
        }
        notifier::do_one_event(EventFlags::ALL);
    }
    Ok(String::new())
}

// --- child interpreters ----------------------------------------------------

fn cmd_interp(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, None, "interp cmd ?arg ...?")?;
    let lookup = |name: &String| {
        interp.child(name).ok_or_else(|| {
            Exception::error(format!("could not find interpreter \"{}\"", name))
        })
    };
    match args[1].as_str() {
        "create" => {
            let mut safe = false;
            let mut name = None;
            for arg in &args[2..] {
                match arg.as_str() {
                    "-safe" => safe = true,
                    "--" => {}
                    other => name = Some(other.to_string()),
                }
            }
            let name = name.unwrap_or_else(|| interp.next_child_name());
            interp.create_child(&name, safe)?;
            Ok(name)
        }
        "delete" => {
            for name in &args[2..] {
                lookup(name)?.delete();
            }
            Ok(String::new())
        }
        "eval" => {
            check_args(args, 3, None, "interp eval path arg ?arg ...?")?;
            let child = lookup(&args[2])?;
            child
                .eval(&args[3..].join(" "))
                .map_err(|e| Exception::error(e.value))
        }
        "exists" => {
            check_args(args, 2, Some(2), "interp exists path")?;
            Ok(i32::from(interp.child(&args[2]).is_some()).to_string())
        }
        "issafe" => match args.get(2) {
            Some(name) => Ok(i32::from(lookup(name)?.is_safe()).to_string()),
            None => Ok(i32::from(interp.is_safe()).to_string()),
        },
        "children" => Ok(merge_list(&interp.children())),
        other => Err(Exception::error(format!(
            "bad option \"{}\": must be children, create, delete, eval, exists, or issafe",
            other
        ))),
    }
}

// --- unsafe ----------------------------------------------------------------

fn cmd_exec(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, None, "exec arg ?arg ...?")?;
    let output = std::process::Command::new(&args[1])
        .args(&args[2..])
        .output()
        .map_err(|e| {
            Exception::error(format!("couldn't execute \"{}\": {}", args[1], e))
        })?;
    let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.ends_with('\n') {
        stdout.pop();
    }
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Exception::error(if stderr.is_empty() {
            format!("child process exited abnormally: {}", output.status)
        } else {
            stderr.trim_end().to_string()
        }))
    }
}

fn cmd_file(_: &Interp, args: &[String]) -> TclResult {
    check_args(args, 2, Some(2), "file exists name")?;
    match args[1].as_str() {
        "exists" => Ok(i32::from(std::path::Path::new(&args[2]).exists()).to_string()),
        other => Err(Exception::error(format!(
            "bad option \"{}\": must be exists",
            other
        ))),
    }
}

fn cmd_source(interp: &Interp, args: &[String]) -> TclResult {
    check_args(args, 1, Some(1), "source fileName")?;
    let script = std::fs::read_to_string(&args[1]).map_err(|e| {
        Exception::error(format!("couldn't read file \"{}\": {}", args[1], e))
    })?;
    match interp.eval_script(&script) {
        Err(e) if e.code == Code::Return => Ok(e.value),
        other => other,
    }
}
