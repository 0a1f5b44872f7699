//! Bootstrap step plan and executor.
//!
//! Bootstrap turns a bare instance into a functioning backup node
//! through a fixed ordered sequence of remote commands. Each step is
//! idempotent and self-contained (no step depends on output captured
//! from another), so a partially bootstrapped host can be inspected or
//! re-run out of band. The plan is pure data: tests assert on the
//! command text without any remote execution.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use bnode_cloud::ProviderSpec;

use crate::config::Config;
use crate::error::LifecycleError;
use crate::node::Node;
use crate::remote::{RemoteError, RemoteExecutor};

/// A named, idempotent remote operation with an ordering position.
#[derive(Debug, Clone)]
pub struct BootstrapStep {
    pub name: &'static str,
    pub command: String,
}

/// Build the ordered step sequence for a node.
pub fn plan(node: &Node, spec: &ProviderSpec, config: &Config) -> Vec<BootstrapStep> {
    vec![
        BootstrapStep {
            name: "create-admin-user",
            command: create_admin_user(config),
        },
        BootstrapStep {
            name: "install-packages",
            command: "apt-get update -qq && apt-get install -y -qq git curl nginx".to_string(),
        },
        BootstrapStep {
            name: "set-hostname",
            command: format!("hostnamectl set-hostname {}", node.name),
        },
        BootstrapStep {
            name: "write-env-file",
            command: write_env_file(node, config),
        },
        BootstrapStep {
            name: "clone-backup-repo",
            command: clone_backup_repo(config),
        },
        BootstrapStep {
            name: "install-backup-cron",
            command: install_backup_cron(config),
        },
        BootstrapStep {
            name: "write-identity-doc",
            command: write_identity_doc(node, spec, config),
        },
        BootstrapStep {
            name: "install-system-cron",
            command: install_system_cron(config),
        },
        BootstrapStep {
            name: "configure-nginx",
            command: configure_nginx(node),
        },
        BootstrapStep {
            name: "configure-backup-service",
            command: configure_backup_service(config),
        },
    ]
}

fn create_admin_user(config: &Config) -> String {
    let user = &config.admin_user;
    format!(
        "useradd -m -s /bin/bash {user} 2>/dev/null || true\n\
         usermod -aG sudo {user}\n\
         echo '{user} ALL=(ALL) NOPASSWD:ALL' > /etc/sudoers.d/{user}\n\
         chmod 440 /etc/sudoers.d/{user}\n\
         mkdir -p /home/{user}/.ssh\n\
         curl -s {keys_url} > /home/{user}/.ssh/authorized_keys\n\
         chmod 700 /home/{user}/.ssh\n\
         chmod 600 /home/{user}/.ssh/authorized_keys\n\
         chown -R {user}:{user} /home/{user}/.ssh",
        keys_url = config.keys_url,
    )
}

fn write_env_file(node: &Node, config: &Config) -> String {
    let user = &config.admin_user;
    let env_content = format!(
        "# {name} backup node config\n\
         NODE_NAME={name}\n\
         HOSTNAME={hostname}\n\
         PROVIDER={provider}\n\
         GITHUB_TOKEN={github_token}\n\
         DISCORD_WEBHOOK_URL={webhook}\n\
         CREATED={created}",
        name = node.name,
        hostname = node.hostname,
        provider = node.provider,
        github_token = config.github_token.as_deref().unwrap_or(""),
        webhook = config.discord_webhook.as_deref().unwrap_or(""),
        created = node.created_at.to_rfc3339(),
    );

    format!(
        "cat > /home/{user}/.env << 'EOF'\n{env_content}\nEOF\n\
         chown {user}:{user} /home/{user}/.env\n\
         chmod 600 /home/{user}/.env"
    )
}

fn clone_backup_repo(config: &Config) -> String {
    let user = &config.admin_user;
    format!(
        "sudo -u {user} git clone {repo} /home/{user}/gitbackup 2>/dev/null || \
         sudo -u {user} git -C /home/{user}/gitbackup pull --ff-only\n\
         mkdir -p /home/{user}/backup\n\
         chown {user}:{user} /home/{user}/backup",
        repo = config.backup_repo_url,
    )
}

fn install_backup_cron(config: &Config) -> String {
    let user = &config.admin_user;
    let script = format!(
        "#!/bin/bash\n\
         source /home/{user}/.env\n\
         \n\
         cd /home/{user}/gitbackup\n\
         ./backup.sh > /tmp/backup.log 2>&1\n\
         RESULT=$?\n\
         \n\
         REPOS=$(ls -1 /home/{user}/backup 2>/dev/null | wc -l)\n\
         DISK=$(df -h / | awk 'NR==2 {{print $3 \"/\" $2}}')\n\
         UPTIME=$(uptime -p)\n\
         \n\
         if [ -n \"$DISCORD_WEBHOOK_URL\" ]; then\n\
         \x20   if [ $RESULT -eq 0 ]; then\n\
         \x20       MSG=\"$NODE_NAME heartbeat | $REPOS repos | disk $DISK | $UPTIME\"\n\
         \x20   else\n\
         \x20       MSG=\"$NODE_NAME backup FAILED | check /tmp/backup.log\"\n\
         \x20   fi\n\
         \x20   curl -s -H \"Content-Type: application/json\" -d \"{{\\\"content\\\": \\\"$MSG\\\"}}\" \"$DISCORD_WEBHOOK_URL\"\n\
         fi"
    );

    format!(
        "cat > /home/{user}/daily-backup.sh << 'SCRIPT'\n{script}\nSCRIPT\n\
         chmod +x /home/{user}/daily-backup.sh\n\
         chown {user}:{user} /home/{user}/daily-backup.sh\n\
         (crontab -u {user} -l 2>/dev/null | grep -v daily-backup.sh; \
         echo \"0 3 * * * /home/{user}/daily-backup.sh\") | crontab -u {user} -"
    )
}

fn write_identity_doc(node: &Node, spec: &ProviderSpec, config: &Config) -> String {
    let identity = json!({
        "node": node.name,
        "hostname": node.hostname,
        "provider": node.provider.as_str(),
        "zone": spec.zone,
        "type": spec.server_type,
        "purpose": "gitbackup-node",
        "cost_monthly_eur": spec.monthly_cost_eur,
        "created": node.created_at.format("%Y-%m-%d").to_string(),
        "owner": config.admin_user,
        "ssh": format!("{}@{}", config.admin_user, node.hostname),
        "services": ["gitbackup", "heartbeat"],
        "status": "active",
    });
    let doc = serde_json::to_string_pretty(&identity).expect("identity doc serializes");

    format!("mkdir -p /var/www/html\ncat > /var/www/html/env.json << 'EOF'\n{doc}\nEOF")
}

fn install_system_cron(config: &Config) -> String {
    let user = &config.admin_user;
    let script = format!(
        "#!/bin/bash\n\
         cat << EOFJ > /var/www/html/system.json\n\
         {{\n\
         \x20 \"hostname\": \"$(hostname)\",\n\
         \x20 \"uptime\": \"$(uptime -p)\",\n\
         \x20 \"load\": \"$(cat /proc/loadavg | cut -d' ' -f1-3)\",\n\
         \x20 \"memory_mb\": {{\n\
         \x20   \"total\": $(free -m | awk '/Mem:/ {{print $2}}'),\n\
         \x20   \"used\": $(free -m | awk '/Mem:/ {{print $3}}'),\n\
         \x20   \"free\": $(free -m | awk '/Mem:/ {{print $4}}')\n\
         \x20 }},\n\
         \x20 \"disk_gb\": {{\n\
         \x20   \"total\": $(df -BG / | awk 'NR==2 {{print $2}}' | tr -d 'G'),\n\
         \x20   \"used\": $(df -BG / | awk 'NR==2 {{print $3}}' | tr -d 'G'),\n\
         \x20   \"free\": $(df -BG / | awk 'NR==2 {{print $4}}' | tr -d 'G')\n\
         \x20 }},\n\
         \x20 \"repos\": $(ls -1 /home/{user}/backup 2>/dev/null | wc -l),\n\
         \x20 \"ip\": \"$(hostname -I | awk '{{print $1}}')\",\n\
         \x20 \"updated\": \"$(date -Iseconds)\"\n\
         }}\n\
         EOFJ"
    );

    format!(
        "cat > /usr/local/bin/update-system-json.sh << 'SCRIPT'\n{script}\nSCRIPT\n\
         chmod +x /usr/local/bin/update-system-json.sh\n\
         /usr/local/bin/update-system-json.sh\n\
         (crontab -l 2>/dev/null | grep -v update-system-json.sh; \
         echo \"*/5 * * * * /usr/local/bin/update-system-json.sh\") | crontab -"
    )
}

fn configure_nginx(node: &Node) -> String {
    let conf = format!(
        "server {{\n\
         \x20   listen 80 default_server;\n\
         \x20   root /var/www/html;\n\
         \x20   server_name _;\n\
         \n\
         \x20   location /env {{ alias /var/www/html/env.json; default_type application/json; }}\n\
         \x20   location /system {{ alias /var/www/html/system.json; default_type application/json; }}\n\
         \x20   location / {{ return 200 '{{\"node\": \"{name}\", \"endpoints\": [\"/env\", \"/system\"]}}'; default_type application/json; }}\n\
         }}",
        name = node.name,
    );

    format!(
        "cat > /etc/nginx/sites-available/default << 'CONF'\n{conf}\nCONF\n\
         nginx -t && systemctl reload nginx"
    )
}

fn configure_backup_service(config: &Config) -> String {
    let user = &config.admin_user;
    let service_config = json!({
        "github_token": config.github_token.as_deref().unwrap_or(""),
        "github_username": config.admin_user,
        "backup_dir": format!("/home/{user}/backup"),
    });
    let doc = serde_json::to_string(&service_config).expect("service config serializes");

    format!(
        "cat > /home/{user}/gitbackup/env.json << 'EOF'\n{doc}\nEOF\n\
         chown {user}:{user} /home/{user}/gitbackup/env.json\n\
         chmod 600 /home/{user}/gitbackup/env.json"
    )
}

/// Run the step sequence against a host, as root, fail-fast.
///
/// A step that exits non-zero or times out aborts the remaining steps
/// and surfaces as [`LifecycleError::Step`] naming the step.
pub async fn run_bootstrap(
    remote: &dyn RemoteExecutor,
    address: Ipv4Addr,
    steps: &[BootstrapStep],
    timeout: Duration,
) -> Result<(), LifecycleError> {
    for (position, step) in steps.iter().enumerate() {
        info!(
            step = step.name,
            position = position + 1,
            total = steps.len(),
            "Running bootstrap step"
        );

        let output = match remote.run(address, "root", &step.command, timeout).await {
            Ok(output) => output,
            Err(RemoteError::Timeout(elapsed)) => {
                return Err(LifecycleError::Step {
                    step: step.name,
                    detail: format!("timed out after {elapsed:?}"),
                })
            }
            Err(e) => {
                return Err(LifecycleError::Step {
                    step: step.name,
                    detail: e.to_string(),
                })
            }
        };

        if !output.success() {
            warn!(
                step = step.name,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "Bootstrap step failed"
            );
            return Err(LifecycleError::Step {
                step: step.name,
                detail: format!(
                    "exit code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use bnode_cloud::{default_specs, ProviderKind};

    use crate::remote::ExecOutput;

    fn fixture() -> (Node, ProviderSpec, Config) {
        let config = Config::for_tests();
        let node = Node::new("b1", ProviderKind::Scaleway, &config.domain);
        let spec = default_specs().remove(&ProviderKind::Scaleway).unwrap();
        (node, spec, config)
    }

    #[test]
    fn test_plan_order_is_fixed() {
        let (node, spec, config) = fixture();
        let steps = plan(&node, &spec, &config);
        let names: Vec<_> = steps.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "create-admin-user",
                "install-packages",
                "set-hostname",
                "write-env-file",
                "clone-backup-repo",
                "install-backup-cron",
                "write-identity-doc",
                "install-system-cron",
                "configure-nginx",
                "configure-backup-service",
            ]
        );
    }

    #[test]
    fn test_user_creation_tolerates_rerun() {
        let (node, spec, config) = fixture();
        let steps = plan(&node, &spec, &config);
        let cmd = &steps[0].command;
        assert!(cmd.contains("useradd -m -s /bin/bash backup 2>/dev/null || true"));
        assert!(cmd.contains("curl -s https://github.com/backup.keys"));
        assert!(cmd.contains("chmod 600 /home/backup/.ssh/authorized_keys"));
    }

    #[test]
    fn test_env_file_is_restricted_to_admin_user() {
        let (node, spec, mut config) = fixture();
        config.github_token = Some("ghp_secret".to_string());
        let steps = plan(&node, &spec, &config);
        let cmd = &steps[3].command;
        assert!(cmd.contains("GITHUB_TOKEN=ghp_secret"));
        assert!(cmd.contains("chmod 600 /home/backup/.env"));
        assert!(cmd.contains("chown backup:backup /home/backup/.env"));
    }

    #[test]
    fn test_identity_doc_names_node() {
        let (node, spec, config) = fixture();
        let steps = plan(&node, &spec, &config);
        let cmd = &steps[6].command;
        assert!(cmd.contains("\"node\": \"b1\""));
        assert!(cmd.contains("\"hostname\": \"b1.example.com\""));
        assert!(cmd.contains("\"provider\": \"scaleway\""));
        assert!(cmd.contains("/var/www/html/env.json"));
    }

    #[test]
    fn test_nginx_advertises_both_endpoints() {
        let (node, spec, config) = fixture();
        let steps = plan(&node, &spec, &config);
        let cmd = &steps[8].command;
        assert!(cmd.contains("location /env"));
        assert!(cmd.contains("location /system"));
        assert!(cmd.contains(r#""endpoints": ["/env", "/system"]"#));
        assert!(cmd.contains("nginx -t && systemctl reload nginx"));
    }

    #[test]
    fn test_crontab_installs_are_deduplicated() {
        let (node, spec, config) = fixture();
        let steps = plan(&node, &spec, &config);
        assert!(steps[5].command.contains("grep -v daily-backup.sh"));
        assert!(steps[5].command.contains("0 3 * * *"));
        assert!(steps[7].command.contains("grep -v update-system-json.sh"));
        assert!(steps[7].command.contains("*/5 * * * *"));
    }

    /// Remote that succeeds until a configured step index, then fails.
    struct FailingRemote {
        fail_at: usize,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteExecutor for FailingRemote {
        async fn run(
            &self,
            _address: Ipv4Addr,
            _user: &str,
            command: &str,
            _timeout: Duration,
        ) -> Result<ExecOutput, RemoteError> {
            let mut commands = self.commands.lock().unwrap();
            let index = commands.len();
            commands.push(command.to_string());

            Ok(if index == self.fail_at {
                ExecOutput {
                    stdout: String::new(),
                    stderr: "E: Unable to locate package".to_string(),
                    exit_code: 100,
                }
            } else {
                ExecOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                }
            })
        }

        async fn probe(&self, _address: Ipv4Addr, _port: u16, _timeout: Duration) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_step_failure_aborts_remaining_steps() {
        let (node, spec, config) = fixture();
        let steps = plan(&node, &spec, &config);
        let remote = FailingRemote {
            fail_at: 1,
            commands: Mutex::new(Vec::new()),
        };

        let err = run_bootstrap(
            &remote,
            "203.0.113.1".parse().unwrap(),
            &steps,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert_eq!(err.failed_step(), Some("install-packages"));
        assert!(err.to_string().contains("exit code 100"));
        // Steps after the failing one were never attempted.
        assert_eq!(remote.commands.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_all_steps_run_in_order_on_success() {
        let (node, spec, config) = fixture();
        let steps = plan(&node, &spec, &config);
        let remote = FailingRemote {
            fail_at: usize::MAX,
            commands: Mutex::new(Vec::new()),
        };

        run_bootstrap(
            &remote,
            "203.0.113.1".parse().unwrap(),
            &steps,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let commands = remote.commands.lock().unwrap();
        assert_eq!(commands.len(), steps.len());
        assert!(commands[2].contains("hostnamectl set-hostname b1"));
    }
}
