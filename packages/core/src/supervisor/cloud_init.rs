//! cloud-init user data for the supervisor droplet.
//!
//! The droplet boots the Docker image, writes the supervisor `.env` and
//! compose file, opens the firewall, starts the stack and waits for
//! `/health` before logging the result to
//! `/var/log/supervisor-deployment.log`.

use minijinja::{context, Environment};

use crate::error::AppError;
use crate::types::SupervisorConfig;

const TEMPLATE_NAME: &str = "cloud-init";

const CLOUD_INIT_TEMPLATE: &str = r#"#cloud-config
package_update: true
packages:
  - curl
  - jq
  - ufw

runcmd:
  - mkdir -p /opt/trigger-supervisor

  - |
    cat > /opt/trigger-supervisor/.env << 'EOF'
    TRIGGER_WORKER_TOKEN={{ trigger_worker_token }}
    MANAGED_WORKER_SECRET={{ managed_worker_secret }}
    TRIGGER_API_URL={{ trigger_api_url }}
    OTEL_EXPORTER_OTLP_ENDPOINT={{ otel_endpoint }}
    TRIGGER_WORKLOAD_API_DOMAIN=supervisor
    TRIGGER_WORKLOAD_API_PORT_EXTERNAL={{ supervisor_port }}
    DEBUG=1
    ENFORCE_MACHINE_PRESETS=1
    TRIGGER_DEQUEUE_INTERVAL_MS=1000
    DOCKER_HOST=tcp://docker-proxy:2375
    DOCKER_RUNNER_NETWORKS=supervisor
    DOCKER_REGISTRY_URL={{ docker_registry_url }}
    DOCKER_REGISTRY_USERNAME={{ docker_registry_username }}
    DOCKER_REGISTRY_PASSWORD={{ docker_registry_password }}
    DOCKER_AUTOREMOVE_EXITED_CONTAINERS=1
    EOF

  - docker network create docker-proxy --driver bridge || echo "Network exists"
  - docker network create supervisor --driver bridge || echo "Network exists"

  - |
    cat > /opt/trigger-supervisor/docker-compose.yml << 'EOF'
    name: trigger

    services:
      supervisor:
        image: ghcr.io/triggerdotdev/supervisor:{{ trigger_version }}
        restart: unless-stopped
        depends_on:
          - docker-proxy
        networks:
          - supervisor
          - docker-proxy
        volumes:
          - shared:/home/node/shared
        ports:
          - "{{ supervisor_port }}:8020"
        user: root
        command: sh -c "chown -R node:node /home/node/shared && exec /usr/bin/dumb-init -- pnpm run --filter supervisor start"
        env_file: .env
        healthcheck:
          test: ["CMD", "node", "-e", "http.get('http://localhost:8020/health', res => process.exit(res.statusCode === 200 ? 0 : 1)).on('error', () => process.exit(1))"]
          interval: 30s
          timeout: 10s
          retries: 5
          start_period: 30s

      docker-proxy:
        image: tecnativa/docker-socket-proxy:latest
        restart: unless-stopped
        volumes:
          - /var/run/docker.sock:/var/run/docker.sock:ro
        networks:
          - docker-proxy
        environment:
          - LOG_LEVEL=info
          - POST=1
          - CONTAINERS=1
          - IMAGES=1
          - INFO=1
          - NETWORKS=1
        healthcheck:
          test: ["CMD", "nc", "-z", "127.0.0.1", "2375"]
          interval: 30s
          timeout: 5s
          retries: 5

    volumes:
      shared:

    networks:
      docker-proxy:
        external: true
      supervisor:
        external: true
    EOF

  - ufw allow 22/tcp
  - ufw allow {{ supervisor_port }}/tcp
  - ufw --force enable

  - systemctl enable docker
  - systemctl start docker

  - |
    echo "Waiting for Docker daemon..."
    for i in {1..30}; do
      if docker info >/dev/null 2>&1; then
        echo "Docker ready after $i attempts"
        break
      fi
      sleep 2
    done

  - cd /opt/trigger-supervisor && docker compose up -d

  - |
    echo "Waiting for supervisor health..."
    for i in {1..60}; do
      if curl -f http://localhost:{{ supervisor_port }}/health >/dev/null 2>&1; then
        echo "Supervisor healthy after $i attempts"
        break
      fi
      sleep 5
    done

  - |
    echo "Deployment completed at $(date)" > /var/log/supervisor-deployment.log
    docker compose ps >> /var/log/supervisor-deployment.log
    curl -s http://localhost:{{ supervisor_port }}/health >> /var/log/supervisor-deployment.log
"#;

/// Render the user-data document. Unset values render as empty strings.
pub fn render(config: &SupervisorConfig, trigger_version: &str, supervisor_port: u16) -> Result<String, AppError> {
    let mut env = Environment::new();
    env.add_template(TEMPLATE_NAME, CLOUD_INIT_TEMPLATE)?;
    let template = env.get_template(TEMPLATE_NAME)?;

    let value = |field: &Option<String>| field.clone().unwrap_or_default();

    let rendered = template.render(context! {
        trigger_worker_token => value(&config.worker_token),
        managed_worker_secret => value(&config.managed_worker_secret),
        trigger_api_url => value(&config.api_url),
        otel_endpoint => value(&config.otel_endpoint),
        docker_registry_url => value(&config.registry_url),
        docker_registry_username => value(&config.registry_username),
        docker_registry_password => value(&config.registry_password),
        trigger_version => trigger_version,
        supervisor_port => supervisor_port,
    })?;

    Ok(rendered)
}
