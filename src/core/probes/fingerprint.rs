// src/core/probes/fingerprint.rs

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::core::models::{
    AnalysisFinding, FingerprintData, ProbeData, ProbeReport, Severity, Technology, ValidatedHost,
};
use crate::core::probes::{bound_summary, capture_headers, http_client, ProbeContext};
use crate::core::redaction;
use crate::error::ProbeError;

/// The checks a fingerprint rule may perform. Inference works from
/// response headers and cookie names only; body content is never read.
enum Check<'a> {
    /// Check for a pattern in a specific HTTP header.
    Header(&'a str, &'a Lazy<Regex>),
    /// Check for a pattern in the `set-cookie` headers.
    Cookie(&'a Lazy<Regex>),
}

/// A rule that defines how to detect a specific technology.
struct FingerprintRule<'a> {
    tech_name: &'a str,
    category: &'a str,
    check: Check<'a>,
}

// Statically compiled regexes. A first capture group, where present,
// extracts the version.
static RE_NGINX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)nginx(?:/([\d\.]+))?").unwrap());
static RE_APACHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Apache(?:/([\d\.]+))?").unwrap());
static RE_IIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Microsoft-IIS/([\d\.]+)").unwrap());
static RE_CLOUDFLARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"cloudflare").unwrap());
static RE_LITESPEED: Lazy<Regex> = Lazy::new(|| Regex::new(r"LiteSpeed").unwrap());
static RE_VARNISH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)varnish").unwrap());
static RE_AKAMAI: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)akamai").unwrap());
static RE_VERCEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)vercel").unwrap());
static RE_NETLIFY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)netlify").unwrap());
static RE_FASTLY_CACHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"cache-[a-z0-9-]+").unwrap());
static RE_PHP: Lazy<Regex> = Lazy::new(|| Regex::new(r"PHP/([\d\.]+)").unwrap());
static RE_PHPSESSID: Lazy<Regex> = Lazy::new(|| Regex::new(r"PHPSESSID").unwrap());
static RE_ASPNET: Lazy<Regex> = Lazy::new(|| Regex::new(r"ASP\.NET").unwrap());
static RE_EXPRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Express").unwrap());
static RE_NEXTJS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Next\.js ?([\d\.]*)").unwrap());
static RE_JSESSIONID: Lazy<Regex> = Lazy::new(|| Regex::new(r"JSESSIONID").unwrap());
static RE_DJANGO_CSRF: Lazy<Regex> = Lazy::new(|| Regex::new(r"csrftoken").unwrap());
static RE_RUBY_RAILS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_rails_session").unwrap());
static RE_LARAVEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"laravel_session").unwrap());
static RE_SHOPIFY: Lazy<Regex> = Lazy::new(|| Regex::new(r"shopify").unwrap());
static RE_MAGENTO: Lazy<Regex> = Lazy::new(|| Regex::new(r"magento").unwrap());

/// The master list of fingerprinting rules.
static RULES: &[FingerprintRule] = &[
    FingerprintRule { tech_name: "Nginx", category: "Web Server", check: Check::Header("server", &RE_NGINX) },
    FingerprintRule { tech_name: "Apache", category: "Web Server", check: Check::Header("server", &RE_APACHE) },
    FingerprintRule { tech_name: "Microsoft IIS", category: "Web Server", check: Check::Header("server", &RE_IIS) },
    FingerprintRule { tech_name: "LiteSpeed", category: "Web Server", check: Check::Header("server", &RE_LITESPEED) },
    FingerprintRule { tech_name: "Cloudflare", category: "CDN / WAF", check: Check::Header("server", &RE_CLOUDFLARE) },
    FingerprintRule { tech_name: "Varnish", category: "CDN / Cache", check: Check::Header("via", &RE_VARNISH) },
    FingerprintRule { tech_name: "Akamai", category: "CDN / WAF", check: Check::Header("server", &RE_AKAMAI) },
    FingerprintRule { tech_name: "Vercel", category: "Hosting", check: Check::Header("server", &RE_VERCEL) },
    FingerprintRule { tech_name: "Netlify", category: "Hosting", check: Check::Header("server", &RE_NETLIFY) },
    FingerprintRule { tech_name: "Fastly", category: "CDN / Cache", check: Check::Header("x-served-by", &RE_FASTLY_CACHE) },
    FingerprintRule { tech_name: "PHP", category: "Language", check: Check::Header("x-powered-by", &RE_PHP) },
    FingerprintRule { tech_name: "PHP", category: "Language", check: Check::Cookie(&RE_PHPSESSID) },
    FingerprintRule { tech_name: "ASP.NET", category: "Framework", check: Check::Header("x-powered-by", &RE_ASPNET) },
    FingerprintRule { tech_name: "Express", category: "Framework", check: Check::Header("x-powered-by", &RE_EXPRESS) },
    FingerprintRule { tech_name: "Next.js", category: "JS Framework", check: Check::Header("x-powered-by", &RE_NEXTJS) },
    FingerprintRule { tech_name: "Java", category: "Language", check: Check::Cookie(&RE_JSESSIONID) },
    FingerprintRule { tech_name: "Python/Django", category: "Framework", check: Check::Cookie(&RE_DJANGO_CSRF) },
    FingerprintRule { tech_name: "Ruby on Rails", category: "Framework", check: Check::Cookie(&RE_RUBY_RAILS) },
    FingerprintRule { tech_name: "Laravel", category: "Framework", check: Check::Cookie(&RE_LARAVEL) },
    FingerprintRule { tech_name: "Shopify", category: "E-commerce", check: Check::Header("x-shopid", &RE_SHOPIFY) },
    FingerprintRule { tech_name: "Magento", category: "E-commerce", check: Check::Cookie(&RE_MAGENTO) },
];

/// Issues a single GET and infers the technology stack from response
/// headers and cookie names. The body is discarded unread.
pub async fn run_tech_fingerprint(
    ctx: &ProbeContext<'_>,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    info!(host = %host.normalized_host, "Starting technology fingerprint.");
    ctx.outbound_slot().await?;

    let client = http_client(ctx.config)?;
    let url = format!("https://{}", host.normalized_host);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ProbeError::Network(format!("HTTP request failed: {e}")))?;

    info!(status = %response.status(), "Received HTTP response for fingerprint.");
    let headers = response.headers().clone();
    let cookies = headers
        .get_all("set-cookie")
        .into_iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    drop(response);

    let data = apply_rules(&capture_headers(&headers), &cookies);
    let findings = analyze_fingerprint(&data);

    let names: Vec<&str> = data.technologies.iter().map(|t| t.name.as_str()).collect();
    let summary = bound_summary(&if names.is_empty() {
        format!("no technologies identified on {}", host.normalized_host)
    } else {
        format!(
            "{} technologies on {}: {}",
            names.len(),
            host.normalized_host,
            names.join(", ")
        )
    });

    let raw = serde_json::to_string_pretty(&data)
        .map_err(|e| ProbeError::Protocol(format!("serialization failed: {e}")))?;
    let (raw_output, _) = redaction::redact(&raw);

    info!(count = %data.technologies.len(), "Technology fingerprint finished.");
    Ok(ProbeReport {
        summary,
        data: ProbeData::Fingerprint(data),
        raw_output,
        findings,
    })
}

fn apply_rules(
    headers: &std::collections::BTreeMap<String, String>,
    cookies: &str,
) -> FingerprintData {
    let mut found_techs: HashMap<String, Technology> = HashMap::new();

    debug!(total_rules = %RULES.len(), "Applying fingerprinting rules.");
    for rule in RULES {
        let version = match &rule.check {
            Check::Header(name, re) => check_with_regex(headers.get(*name).map(|v| v.as_str()), re),
            Check::Cookie(re) => check_with_regex(Some(cookies), re),
        };

        if let Some(v) = version {
            debug!(tech = %rule.tech_name, version = ?v, "Rule matched.");
            let tech_name_str = rule.tech_name.to_string();
            if let Some(existing_tech) = found_techs.get_mut(&tech_name_str) {
                if existing_tech.version.is_none() && v.is_some() {
                    existing_tech.version = v;
                }
            } else {
                found_techs.insert(
                    tech_name_str,
                    Technology {
                        name: rule.tech_name.to_string(),
                        category: rule.category.to_string(),
                        version: v,
                    },
                );
            }
        }
    }

    let mut technologies: Vec<Technology> = found_techs.into_values().collect();
    technologies.sort_by(|a, b| a.name.cmp(&b.name));
    FingerprintData { technologies }
}

/// Applies a regex to an optional string slice. Returns `Some(version)`
/// when the pattern matches; the inner option carries a captured version
/// if the first group matched non-empty.
fn check_with_regex(text_option: Option<&str>, re: &Regex) -> Option<Option<String>> {
    text_option.and_then(|text| {
        re.captures(text).map(|caps| {
            caps.get(1)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        })
    })
}

fn analyze_fingerprint(data: &FingerprintData) -> Vec<AnalysisFinding> {
    let mut analyses = Vec::new();
    if data.technologies.iter().any(|t| t.version.is_some()) {
        analyses.push(AnalysisFinding::new(
            Severity::Info,
            "FINGERPRINT_VERSION_DISCLOSED",
        ));
    }
    analyses
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn server_header_identifies_nginx_with_version() {
        let data = apply_rules(&headers(&[("server", "nginx/1.25.3")]), "");
        assert_eq!(
            data.technologies,
            vec![Technology {
                name: "Nginx".into(),
                category: "Web Server".into(),
                version: Some("1.25.3".into()),
            }]
        );
    }

    #[test]
    fn unversioned_server_header_still_matches() {
        let data = apply_rules(&headers(&[("server", "nginx")]), "");
        assert_eq!(data.technologies[0].version, None);
    }

    #[test]
    fn cookie_names_identify_frameworks() {
        let cookies = "PHPSESSID=abc; path=/; laravel_session=xyz";
        let data = apply_rules(&headers(&[]), cookies);
        let names: Vec<&str> = data.technologies.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Laravel", "PHP"]);
    }

    #[test]
    fn version_from_second_rule_fills_first_match() {
        // Cookie rule matches PHP without a version; header rule carries one.
        let data = apply_rules(&headers(&[("x-powered-by", "PHP/8.3.1")]), "PHPSESSID=a");
        let php = data
            .technologies
            .iter()
            .find(|t| t.name == "PHP")
            .unwrap();
        assert_eq!(php.version, Some("8.3.1".into()));
        assert_eq!(data.technologies.iter().filter(|t| t.name == "PHP").count(), 1);
    }

    #[test]
    fn version_disclosure_produces_info_finding() {
        let data = apply_rules(&headers(&[("server", "Apache/2.4.62")]), "");
        let findings = analyze_fingerprint(&data);
        assert_eq!(
            findings,
            vec![AnalysisFinding::new(
                Severity::Info,
                "FINGERPRINT_VERSION_DISCLOSED"
            )]
        );
    }

    #[test]
    fn clean_responses_identify_nothing() {
        let data = apply_rules(&headers(&[("content-type", "text/html")]), "");
        assert!(data.technologies.is_empty());
        assert!(analyze_fingerprint(&data).is_empty());
    }
}
