use crate::output::{print_json, print_table};
use crate::root::Vault;
use chrono::Utc;
use vault_core::audit::{self, AuditPolicy};

pub fn run(vault: &Vault, strict: bool, no_fs: bool, json: bool) -> anyhow::Result<()> {
    let config = vault.load_config()?;
    let manager = vault.load_inventory()?;
    let policy = AuditPolicy::from_config(&config, !no_fs);
    let report = audit::audit(manager.inventory(), &policy, Utc::now());

    if json {
        print_json(&report)?;
    } else if report.findings.is_empty() {
        println!("No findings.");
    } else {
        let rows = report
            .findings
            .iter()
            .map(|f| {
                vec![
                    f.severity.to_string(),
                    f.code.to_string(),
                    f.subject.clone(),
                    f.message.clone(),
                ]
            })
            .collect();
        print_table(&["SEVERITY", "CODE", "SUBJECT", "MESSAGE"], rows);
        println!(
            "\n{} critical, {} warning, {} info",
            report.summary.critical, report.summary.warning, report.summary.info
        );
    }

    if strict && report.has_critical() {
        anyhow::bail!(
            "audit found {} critical finding(s)",
            report.summary.critical
        );
    }
    Ok(())
}
