//! Output formatting for CLI commands

use super::harness::StatusReport;
use anyhow::Result;
use medplus_session::Role;

fn role_label(role: Option<Role>) -> &'static str {
    role.map(|r| r.as_str()).unwrap_or("-")
}

/// Render a report as aligned text lines.
pub fn format_report(report: &StatusReport) -> String {
    let mut lines = Vec::new();
    match (&report.user_id, &report.email) {
        (Some(user), Some(email)) => lines.push(format!("Signed in:   {} <{}>", user, email)),
        (Some(user), None) => lines.push(format!("Signed in:   {}", user)),
        _ => lines.push("Signed in:   no".to_string()),
    }
    lines.push(format!("State:       {}", report.state));
    lines.push(format!("Route:       {}", report.route));
    lines.push(format!(
        "Active role: {} (account: {})",
        role_label(report.role.active_role),
        role_label(report.role.authoritative_role)
    ));
    if report.can_switch_role {
        lines.push("Switching:   available".to_string());
    }
    if !report.redirects.is_empty() {
        lines.push(format!("Redirected:  {}", report.redirects.join(" -> ")));
    }
    lines.join("\n")
}

pub fn print_report(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", format_report(report));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use medplus_session::{RoleState, RouteState};

    fn report() -> StatusReport {
        StatusReport {
            signed_in: false,
            user_id: None,
            email: None,
            state: RouteState::Unauthenticated,
            route: "/auth/login".to_string(),
            role: RoleState {
                active_role: Some(Role::Patient),
                authoritative_role: None,
                is_loading: false,
                has_synced: false,
                cache_loaded: true,
            },
            can_switch_role: false,
            redirects: vec!["/auth/login".to_string()],
        }
    }

    #[test]
    fn test_format_signed_out() {
        let text = format_report(&report());
        assert!(text.contains("Signed in:   no"));
        assert!(text.contains("State:       unauthenticated"));
        assert!(text.contains("Active role: patient (account: -)"));
        assert!(text.contains("Redirected:  /auth/login"));
        assert!(!text.contains("Switching"));
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(report()).unwrap();
        assert_eq!(value["state"]["state"], "unauthenticated");
        assert_eq!(value["role"]["active_role"], "patient");
        assert_eq!(value["route"], "/auth/login");
    }
}
