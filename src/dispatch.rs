//! C4: request dispatch, routing `NAMESPACE.VERB` combinations per
//! spec.md §4.4, grounded on `original_source/src/hub/process.c` (including
//! its exact kick-reason wording, reused here verbatim).

use std::sync::Arc;

use crate::hub::HubContext;
use crate::logger::Severity;
use crate::notify::Filter;
use crate::protocol::Message;
use crate::session::{Session, State};
use crate::vars;

/// What the server's accept-loop thread should do after a message has been
/// handled.
pub enum Outcome {
    Continue,
    /// The client asked the whole hub to shut down (`COMM.SHUTDOWN`), and
    /// was authenticated to do so.
    Shutdown,
}

pub fn dispatch(ctx: &HubContext, session: &Arc<Session>, msg: &Message) -> Outcome {
    let namespace = match msg.component_str(0) {
        Ok(ns) => ns,
        Err(_) => {
            session.kick("Illegal message");
            return Outcome::Continue;
        }
    };
    let verb = match msg.component_str(1) {
        Ok(v) => v,
        Err(_) => {
            session.kick("Illegal message");
            return Outcome::Continue;
        }
    };

    // Everything except COMM.AUTH requires an authenticated session.
    if namespace != "COMM" && session.state() != State::Connected {
        session.kick("Illegal message");
        return Outcome::Continue;
    }

    match (namespace, verb) {
        ("COMM", "AUTH") => {
            handle_auth(ctx, session, msg);
            Outcome::Continue
        }
        ("COMM", "SHUTDOWN") => handle_shutdown(session),
        ("NOTIFY", "OUT") => {
            handle_notify_out(ctx, session, msg);
            Outcome::Continue
        }
        ("NOTIFY", "ADD_FILTER") => {
            handle_add_filter(session, msg);
            Outcome::Continue
        }
        ("NOTIFY", "CLEAR_FILTERS") => {
            session.clear_filters();
            Outcome::Continue
        }
        ("VAR", "GET") => {
            handle_var_get(ctx, session, msg);
            Outcome::Continue
        }
        ("VAR", "SET") => {
            handle_var_set(ctx, session, msg);
            Outcome::Continue
        }
        ("WATCH", "ADD") => {
            handle_watch_add(ctx, session, msg);
            Outcome::Continue
        }
        ("WATCH", "DEL") => {
            handle_watch_del(ctx, session, msg);
            Outcome::Continue
        }
        ("LOG", _) => {
            handle_log(session, msg);
            Outcome::Continue
        }
        _ => {
            session.kick("Illegal message");
            Outcome::Continue
        }
    }
}

fn handle_auth(ctx: &HubContext, session: &Arc<Session>, msg: &Message) {
    if session.state() != State::Unauthenticated {
        session.kick("Already authenticated");
        return;
    }
    let supplied = msg.component_str(2).unwrap_or("");
    if supplied != ctx.password {
        let _ = session.send(&Message::new(msg.request_id, vec!["COMM", "FAILURE"]));
        session.kick("Authentication failure");
        return;
    }
    session.set_state(State::Connected);
    let _ = session.send(&Message::new(msg.request_id, vec!["COMM", "SUCCESS"]));
}

fn handle_shutdown(session: &Arc<Session>) -> Outcome {
    session.close_gracefully();
    Outcome::Shutdown
}

fn handle_notify_out(ctx: &HubContext, session: &Arc<Session>, msg: &Message) {
    let text = match msg.component_str(2) {
        Ok(t) => t,
        Err(_) => {
            session.kick("Illegal message");
            return;
        }
    };

    for other in ctx.clients.snapshot() {
        if Arc::ptr_eq(&other, session) || other.is_closed() {
            continue;
        }
        if other.matches_any_filter(text) {
            let _ = other.send(&Message::unsolicited(vec!["NOTIFY", "IN", text]));
        }
    }
}

fn handle_add_filter(session: &Arc<Session>, msg: &Message) {
    let raw_kind = msg.component_str(2).unwrap_or("");
    let pattern = msg.component_str(3).unwrap_or("");

    let kind = match raw_kind {
        "1" => "MATCH",
        "2" => "ACTION",
        "3" => "PREFIX",
        _ => {
            session.kick("Invalid filter");
            return;
        }
    };

    match Filter::parse(kind, pattern) {
        Ok(filter) => session.add_filter(filter),
        Err(_) => session.kick("Invalid filter"),
    }
}

fn handle_var_get(ctx: &HubContext, session: &Arc<Session>, msg: &Message) {
    let name = match msg.component_str(2) {
        Ok(n) => n,
        Err(_) => {
            session.kick("Illegal message");
            return;
        }
    };
    match ctx.vars.get(name) {
        Ok((value, readonly)) => {
            let flag = if readonly { "RO" } else { "RW" };
            let _ = session.send(&Message::new(
                msg.request_id,
                vec!["VAR".to_string(), "VALUE".to_string(), flag.to_string(), vars::format_wire_value(value)],
            ));
        }
        Err(_) => session.kick(&format!("Invalid variable access ({})", name)),
    }
}

fn handle_var_set(ctx: &HubContext, session: &Arc<Session>, msg: &Message) {
    let name = match msg.component_str(2) {
        Ok(n) => n,
        Err(_) => {
            session.kick("Illegal message");
            return;
        }
    };
    let raw_value = msg.component_str(3).unwrap_or("");
    let value: f64 = match raw_value.parse() {
        Ok(v) => v,
        Err(_) => {
            session.kick(&format!("Invalid variable access ({})", name));
            return;
        }
    };

    match ctx.vars.set(name, value) {
        Ok(subscribers) => {
            if ctx.vars.is_persistent(name) {
                ctx.persist.mark_dirty();
            }
            let update = Message::unsolicited(vec![
                "WATCH".to_string(),
                name.to_string(),
                vars::format_wire_value(value),
            ]);
            for subscriber in subscribers {
                let _ = subscriber.send(&update);
            }
            // On success VAR.SET gets no response (spec.md §4.4/§6).
        }
        Err(_) => session.kick(&format!("Invalid variable access ({})", name)),
    }
}

fn handle_watch_add(ctx: &HubContext, session: &Arc<Session>, msg: &Message) {
    let name = match msg.component_str(2) {
        Ok(n) => n,
        Err(_) => {
            session.kick("Illegal message");
            return;
        }
    };
    match ctx.vars.subscribe(name, session) {
        Ok(()) => session.subscribe(name.to_string()),
        Err(_) => session.kick(&format!("Subscribing to invalid variable ({})", name)),
    }
}

fn handle_watch_del(ctx: &HubContext, session: &Arc<Session>, msg: &Message) {
    let name = match msg.component_str(2) {
        Ok(n) => n,
        Err(_) => {
            session.kick("Illegal message");
            return;
        }
    };
    if !ctx.vars.contains(name) {
        session.kick(&format!("Unsubscribing to invalid variable ({})", name));
        return;
    }
    ctx.vars.unsubscribe(name, session);
    session.unsubscribe(name);
}

fn handle_log(session: &Arc<Session>, msg: &Message) {
    let app = msg.component_str(1).unwrap_or("");
    let raw_severity = msg.component_str(2).unwrap_or("");
    let text = msg.component_str(3).unwrap_or("");

    let severity = raw_severity
        .parse::<i64>()
        .ok()
        .and_then(|n| Severity::from_wire(n).ok())
        .or_else(|| Severity::from_name(raw_severity).ok());

    let Some(severity) = severity else {
        session.kick("Invalid log level");
        return;
    };

    log::log!(target: app, severity.to_log_level(), "{}", text);
}
