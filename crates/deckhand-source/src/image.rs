//! Build recipe image resolution
//!
//! Given a container build recipe, find a pre-built image that runs the same
//! application so nothing has to be built. Resolution is table-driven and
//! ordered; the first rule that yields an image wins:
//!
//! 1. publisher convention on the source repository (`linuxserver/docker-<app>`)
//! 2. a registry-qualified application image referenced anywhere in the recipe
//! 3. a final `FROM` naming a known standalone server image
//! 4. a trivially short recipe, whose base image is runnable as-is
//!
//! Anything else is [`Resolution::MustBuild`].

use std::sync::LazyLock;

use deckhand_common::Error;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::fetch::RepoIdentity;
use crate::model::DEFAULT_PORT;

/// A publisher whose repositories map 1:1 onto published images
struct PublisherConvention {
    owner: &'static str,
    repo_prefix: &'static str,
    image_prefix: &'static str,
    ports: &'static [(&'static str, u16)],
    default_port: u16,
}

/// Web UI ports of well-known linuxserver.io images
const LINUXSERVER_PORTS: &[(&str, u16)] = &[
    ("bazarr", 6767),
    ("bookstack", 80),
    ("calibre", 8080),
    ("calibre-web", 8083),
    ("chromium", 3000),
    ("code-server", 8443),
    ("deluge", 8112),
    ("duplicati", 8200),
    ("emby", 8096),
    ("firefox", 3000),
    ("freshrss", 80),
    ("grocy", 80),
    ("heimdall", 80),
    ("homeassistant", 8123),
    ("jackett", 9117),
    ("jellyfin", 8096),
    ("librespeed", 80),
    ("lidarr", 8686),
    ("mylar3", 8090),
    ("nextcloud", 443),
    ("nzbget", 6789),
    ("ombi", 3579),
    ("overseerr", 5055),
    ("plex", 32400),
    ("prowlarr", 9696),
    ("qbittorrent", 8080),
    ("radarr", 7878),
    ("readarr", 8787),
    ("sabnzbd", 8080),
    ("sonarr", 8989),
    ("syncthing", 8384),
    ("tautulli", 8181),
    ("transmission", 9091),
    ("webtop", 3000),
    ("wikijs", 3000),
    ("wireshark", 3000),
];

const PUBLISHERS: &[PublisherConvention] = &[PublisherConvention {
    owner: "linuxserver",
    repo_prefix: "docker-",
    image_prefix: "lscr.io/linuxserver/",
    ports: LINUXSERVER_PORTS,
    default_port: 3000,
}];

/// Standalone server images that run without a build step, with their
/// listening port. Keyed by repository path without registry or tag.
const SERVER_IMAGE_PORTS: &[(&str, u16)] = &[
    ("adminer", 8080),
    ("caddy", 80),
    ("consul", 8500),
    ("drupal", 80),
    ("elasticsearch", 9200),
    ("ghost", 2368),
    ("gitea/gitea", 3000),
    ("grafana/grafana", 3000),
    ("haproxy", 80),
    ("hashicorp/vault", 8200),
    ("homeassistant/home-assistant", 8123),
    ("httpd", 80),
    ("influxdb", 8086),
    ("jellyfin/jellyfin", 8096),
    ("jenkins/jenkins", 8080),
    ("joomla", 80),
    ("keycloak/keycloak", 8080),
    ("kibana", 5601),
    ("louislam/uptime-kuma", 3001),
    ("mariadb", 3306),
    ("mattermost/mattermost-team-edition", 8065),
    ("mediawiki", 80),
    ("memcached", 11211),
    ("metabase/metabase", 3000),
    ("minio/minio", 9000),
    ("mongo", 27017),
    ("mysql", 3306),
    ("n8nio/n8n", 5678),
    ("nextcloud", 80),
    ("nginx", 80),
    ("nginxinc/nginx-unprivileged", 8080),
    ("nodered/node-red", 1880),
    ("phpmyadmin", 80),
    ("plexinc/pms-docker", 32400),
    ("portainer/portainer-ce", 9000),
    ("postgres", 5432),
    ("prom/prometheus", 9090),
    ("rabbitmq", 5672),
    ("redis", 6379),
    ("redmine", 3000),
    ("registry", 5000),
    ("sonarqube", 9000),
    ("tomcat", 8080),
    ("traefik", 80),
    ("vaultwarden/server", 80),
    ("verdaccio/verdaccio", 4873),
    ("wordpress", 80),
];

/// Name fragments marking an image meant to be built upon, not run
const BASE_IMAGE_MARKERS: &[&str] = &["baseimage", "base-image", "-base", "/base", "buildpack"];

/// Language runtimes and distributions: registry-qualified, still not an app
const RUNTIME_BASES: &[&str] = &[
    "python",
    "node",
    "golang",
    "ruby",
    "php",
    "rust",
    "openjdk",
    "eclipse-temurin",
    "amazoncorretto",
    "dotnet/sdk",
    "dotnet/aspnet",
    "dotnet/runtime",
    "alpine",
    "debian",
    "ubuntu",
    "centos",
    "fedora",
    "busybox",
    "distroless/static",
    "distroless/base",
];

static REGISTRY_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:ghcr\.io|quay\.io|lscr\.io|registry\.gitlab\.com|docker\.io|gcr\.io|mcr\.microsoft\.com|public\.ecr\.aws)/[a-z0-9][a-z0-9._/-]*(?::[A-Za-z0-9_][A-Za-z0-9_.-]*)?(?:@sha256:[a-f0-9]{64})?",
    )
    .expect("registry reference regex is valid")
});

/// How a recipe resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionSource {
    /// Publisher naming convention on the source repository
    Publisher,
    /// Registry-qualified reference found in the recipe
    RegistryReference,
    /// Allow-listed server image in the final FROM
    KnownServer,
    /// Recipe too short to change the base image meaningfully
    TrivialRecipe,
}

/// A runnable image found for a recipe
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedImage {
    /// Image reference
    pub image: String,
    /// Port the image listens on
    pub port: u16,
    /// Entrypoint carried over from the recipe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Arguments carried over from the recipe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Which rule matched
    pub source: ResolutionSource,
}

impl ResolvedImage {
    fn new(image: impl Into<String>, port: u16, source: ResolutionSource) -> Self {
        Self {
            image: image.into(),
            port,
            command: None,
            args: None,
            source,
        }
    }
}

/// Outcome of [`resolve`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A pre-built image runs this recipe
    Resolved(ResolvedImage),
    /// The recipe has to be built; `base_image` is the final FROM, if any
    MustBuild {
        /// Final base image of the recipe
        base_image: Option<String>,
    },
}

impl Resolution {
    /// The resolved image, or an actionable input error naming the alternatives
    pub fn into_image(self, app: &str) -> Result<ResolvedImage, Error> {
        match self {
            Resolution::Resolved(image) => Ok(image),
            Resolution::MustBuild { base_image } => {
                let from = base_image
                    .map(|b| format!(" (based on '{}')", b))
                    .unwrap_or_default();
                Err(Error::input_for_field(
                    "content",
                    format!(
                        "no pre-built image found for '{}'{}: the build recipe must be built from source. \
                         Use a pre-built image instead, supply a manifest or compose file, \
                         or deploy an image directly",
                        app, from
                    ),
                ))
            }
        }
    }
}

/// Resolve a build recipe to a runnable image.
pub fn resolve(recipe: &str, repo: Option<&RepoIdentity>) -> Resolution {
    let parsed = Recipe::parse(recipe);

    let resolution = repo
        .and_then(from_publisher)
        .or_else(|| from_registry_reference(recipe))
        .or_else(|| parsed.final_base().and_then(from_known_server))
        .or_else(|| from_trivial_recipe(&parsed));

    match resolution {
        Some(image) => {
            debug!(image = %image.image, port = image.port, source = ?image.source, "resolved build recipe");
            Resolution::Resolved(image)
        }
        None => Resolution::MustBuild {
            base_image: parsed.final_base().map(String::from),
        },
    }
}

fn from_publisher(repo: &RepoIdentity) -> Option<ResolvedImage> {
    let publisher = PUBLISHERS
        .iter()
        .find(|p| p.owner.eq_ignore_ascii_case(&repo.owner))?;
    let repo_name = repo.repo.to_ascii_lowercase();
    let app = repo_name
        .strip_prefix(publisher.repo_prefix)
        .unwrap_or(repo_name.as_str());
    if app.is_empty() {
        return None;
    }
    let port = lookup(publisher.ports, app).unwrap_or(publisher.default_port);
    Some(ResolvedImage::new(
        format!("{}{}:latest", publisher.image_prefix, app),
        port,
        ResolutionSource::Publisher,
    ))
}

fn from_registry_reference(recipe: &str) -> Option<ResolvedImage> {
    REGISTRY_REFERENCE
        .find_iter(recipe)
        .map(|m| m.as_str())
        .find(|reference| !is_base_image(reference) && !is_runtime_base(reference))
        .map(|reference| {
            ResolvedImage::new(reference, DEFAULT_PORT, ResolutionSource::RegistryReference)
        })
}

fn from_known_server(base: &str) -> Option<ResolvedImage> {
    let path = repository_path(base);
    let port = lookup(SERVER_IMAGE_PORTS, &path).or_else(|| {
        // bitnami/redis, library/nginx, ... fall back to the image's own name
        let last = path.rsplit('/').next()?;
        lookup(SERVER_IMAGE_PORTS, last)
    })?;
    Some(ResolvedImage::new(base, port, ResolutionSource::KnownServer))
}

fn from_trivial_recipe(recipe: &Recipe) -> Option<ResolvedImage> {
    let base = recipe.final_base()?;
    if recipe.instructions.len() > 1 || base == "scratch" || is_base_image(base) {
        return None;
    }

    let mut image = ResolvedImage::new(base, DEFAULT_PORT, ResolutionSource::TrivialRecipe);
    for (keyword, rest) in &recipe.instructions {
        match keyword.as_str() {
            "EXPOSE" => {
                if let Some(port) = rest
                    .split_whitespace()
                    .next()
                    .and_then(|p| p.split('/').next())
                    .and_then(|p| p.parse::<u16>().ok())
                {
                    image.port = port;
                }
            }
            "CMD" => image.args = exec_form(rest),
            "ENTRYPOINT" => image.command = exec_form(rest),
            _ => {}
        }
    }
    Some(image)
}

fn lookup(table: &[(&str, u16)], key: &str) -> Option<u16> {
    table.iter().find(|(k, _)| *k == key).map(|(_, port)| *port)
}

fn is_base_image(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    BASE_IMAGE_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_runtime_base(reference: &str) -> bool {
    RUNTIME_BASES.contains(&repository_path(reference).as_str())
}

/// Repository path of an image reference, without registry, tag or digest
///
/// `docker.io/library/nginx:1.27` and `nginx` both become `nginx`.
pub fn repository_path(reference: &str) -> String {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    let mut parts: Vec<&str> = without_digest.split('/').collect();
    if parts.len() > 1 {
        let first = parts[0];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            parts.remove(0);
        }
    }
    let mut path = parts.join("/");
    if let Some(idx) = path.rfind(':') {
        if !path[idx..].contains('/') {
            path.truncate(idx);
        }
    }
    path.strip_prefix("library/")
        .map(String::from)
        .unwrap_or(path)
        .to_ascii_lowercase()
}

/// Shell or exec form (`CMD ["a", "b"]` / `CMD a b`) to a list
fn exec_form(rest: &str) -> Option<Vec<String>> {
    let rest = rest.trim();
    if rest.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(rest) {
            return (!list.is_empty()).then_some(list);
        }
    }
    if rest.is_empty() {
        return None;
    }
    Some(vec!["/bin/sh".to_string(), "-c".to_string(), rest.to_string()])
}

/// The parts of a build recipe resolution cares about
#[derive(Debug, Default)]
struct Recipe {
    /// Base image of every FROM, in order
    bases: Vec<String>,
    /// Non-FROM instructions as (KEYWORD, rest)
    instructions: Vec<(String, String)>,
}

impl Recipe {
    fn parse(text: &str) -> Self {
        let mut recipe = Recipe::default();
        for line in logical_lines(text) {
            let (keyword, rest) = match line.split_once(char::is_whitespace) {
                Some((k, r)) => (k.to_ascii_uppercase(), r.trim().to_string()),
                None => (line.to_ascii_uppercase(), String::new()),
            };
            if keyword == "FROM" {
                let base = rest
                    .split_whitespace()
                    .find(|t| !t.starts_with("--"))
                    .unwrap_or_default();
                if !base.is_empty() {
                    recipe.bases.push(base.to_string());
                }
            } else {
                recipe.instructions.push((keyword, rest));
            }
        }
        recipe
    }

    fn final_base(&self) -> Option<&str> {
        self.bases.last().map(String::as_str)
    }
}

/// Lines with comments dropped and `\` continuations joined
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for raw in text.lines() {
        let line = raw.trim();
        if current.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        match line.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.trim().is_empty() {
        lines.push(current);
    }
    lines
}
