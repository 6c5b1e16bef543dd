//! HTML fragments pushed to streaming clients.
//!
//! Each fragment's root element carries the id its frame targets, so a
//! client can replace it in place (`#player-list`, `#role-config`,
//! `#start-panel`, `#countdown`, `#game`).

use std::fmt::{self, Write};

use rolecall_core::roles::RoleKind;
use rolecall_core::room::{Room, RoomState};

#[derive(Debug)]
pub enum RenderError {
    /// The viewer holds no seat in the room.
    UnknownViewer(String),
    Format(fmt::Error),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownViewer(id) => write!(f, "viewer {id} is not in the room"),
            Self::Format(e) => write!(f, "format error: {e}"),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<fmt::Error> for RenderError {
    fn from(e: fmt::Error) -> Self {
        Self::Format(e)
    }
}

/// Produces the fragments streaming sessions send. Page templates live
/// outside the server; only the live-updating pieces are rendered here.
pub trait Renderer: Send + Sync {
    fn player_list(&self, room: &Room) -> Result<String, RenderError>;

    fn role_config(&self, room: &Room) -> Result<String, RenderError>;

    /// Start controls for the host, a waiting notice for everyone else.
    fn start_panel(&self, room: &Room, viewer: &str) -> Result<String, RenderError>;

    fn countdown(&self, remaining: i64) -> Result<String, RenderError>;

    /// The whole game screen as `viewer` sees it.
    fn game(&self, room: &Room, viewer: &str) -> Result<String, RenderError>;
}

/// Plain HTML renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRenderer;

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl Renderer for HtmlRenderer {
    fn player_list(&self, room: &Room) -> Result<String, RenderError> {
        let mut out = String::new();
        write!(
            out,
            r#"<ul id="player-list" data-count="{}" data-max="{}">"#,
            room.players.len(),
            room.max_players
        )?;
        for p in room.players_by_join_order() {
            write!(
                out,
                r#"<li data-player-id="{}">{}"#,
                html_escape(&p.id),
                html_escape(&p.name)
            )?;
            if p.is_host {
                out.push_str(r#" <span class="host">host</span>"#);
            }
            out.push_str("</li>");
        }
        out.push_str("</ul>");
        Ok(out)
    }

    fn role_config(&self, room: &Room) -> Result<String, RenderError> {
        let mut out = String::new();
        write!(
            out,
            r#"<section id="role-config"><p>Up to {} players</p><ul>"#,
            room.max_players
        )?;
        for (kind, count) in room.roles.iter() {
            write!(
                out,
                r#"<li data-role="{kind:?}" data-team="{:?}">{} &times; {count}</li>"#,
                kind.team(),
                kind.display_name()
            )?;
        }
        out.push_str("</ul></section>");
        Ok(out)
    }

    fn start_panel(&self, room: &Room, viewer: &str) -> Result<String, RenderError> {
        let player = room
            .player(viewer)
            .ok_or_else(|| RenderError::UnknownViewer(viewer.to_string()))?;
        let mut out = String::from(r#"<div id="start-panel">"#);
        if !player.is_host {
            out.push_str("<p>Waiting for the host to start</p></div>");
            return Ok(out);
        }
        let issues = room.start_issues();
        if issues.is_empty() {
            out.push_str(r#"<button class="start">Start game</button>"#);
        } else {
            out.push_str(r#"<button class="start" disabled>Start game</button><ul class="issues">"#);
            for issue in issues {
                write!(out, "<li>{}</li>", html_escape(&issue))?;
            }
            out.push_str("</ul>");
        }
        out.push_str("</div>");
        Ok(out)
    }

    fn countdown(&self, remaining: i64) -> Result<String, RenderError> {
        let shown = remaining.max(0);
        Ok(format!(
            r#"<div id="countdown" data-remaining="{shown}">{shown}</div>"#
        ))
    }

    fn game(&self, room: &Room, viewer: &str) -> Result<String, RenderError> {
        let me = room
            .player(viewer)
            .ok_or_else(|| RenderError::UnknownViewer(viewer.to_string()))?;
        let mut out = String::new();
        write!(out, r#"<div id="game" data-state="{}">"#, room.state)?;

        match room.state {
            RoomState::Lobby => out.push_str("<p>Waiting in the lobby</p>"),
            RoomState::Countdown => {
                out.push_str("<p>Roles are being dealt</p>");
                out.push_str(&self.countdown(i64::from(room.countdown_remaining))?);
            },
            RoomState::Playing | RoomState::Ended => {
                match (me.role, me.role_revealed) {
                    (Some(role), true) => write!(
                        out,
                        r#"<div class="card" data-role="{role:?}"><h2>{}</h2><p>Team {:?}</p></div>"#,
                        role.display_name(),
                        role.team()
                    )?,
                    (Some(_), false) => {
                        out.push_str(r#"<button class="reveal">Reveal your role</button>"#);
                    },
                    (None, _) => out.push_str("<p>You have no role this round</p>"),
                }

                out.push_str(r#"<ul class="table">"#);
                for p in room.players_by_join_order() {
                    write!(out, "<li>{}", html_escape(&p.name))?;
                    let public = p.role.filter(|r| {
                        p.role_revealed
                            || (room.leader_revealed && *r == RoleKind::Leader)
                    });
                    if let Some(role) = public {
                        write!(out, r#" <span class="role">{}</span>"#, role.display_name())?;
                    }
                    out.push_str("</li>");
                }
                out.push_str("</ul>");
            },
        }

        out.push_str("</div>");
        Ok(out)
    }
}
