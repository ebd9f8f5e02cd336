use std::path::Path;

use colored::*;

use crate::broadcast::StreamEvent;
use crate::locations::LocationCatalog;
use crate::models::{LocationResult, RunRecord};

fn latency_colored(ms: f64) -> ColoredString {
    let text = format!("{:.1}ms", ms);
    match ms {
        ms if ms < 100.0 => text.green(),
        ms if ms < 250.0 => text.yellow(),
        _ => text.red(),
    }
}

pub(crate) fn format_location_line(index: usize, total: usize, result: &LocationResult) -> String {
    let name = &result.location.name;
    match (&result.best_isp, result.success) {
        (Some(best), true) => {
            let stats = &result.aggregated_stats;
            format!(
                "{} [{}/{}] {} ({}/{} ISPs): Best: {} {} ↓{:.1}/↑{:.1} | Avg: {:.1}ms ↓{:.1}/↑{:.1} Mbps",
                "✅".green(),
                index,
                total,
                name.bold(),
                stats.successful_isps,
                stats.total_isps,
                best.isp,
                latency_colored(best.latency_ms),
                best.download_mbps,
                best.upload_mbps,
                stats.avg_latency_ms,
                stats.avg_download_mbps,
                stats.avg_upload_mbps
            )
        }
        _ => format!(
            "{} [{}/{}] {}: {} ({} ISPs tried)",
            "❌".red(),
            index,
            total,
            name.bold(),
            result.error.as_deref().unwrap_or("unknown error").red(),
            result.servers_attempted
        ),
    }
}

/// Prints the live event stream to the terminal.
#[derive(Debug, Default)]
pub(crate) struct ConsoleObserver {
    total: usize,
    reported: usize,
}

impl ConsoleObserver {
    pub(crate) fn handle(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Locations(locations) => {
                self.total = locations.len();
                println!("📍 Testing {} locations sequentially", self.total);
            }
            StreamEvent::RunStarted => {
                self.reported = 0;
                println!();
            }
            StreamEvent::Progress(p) => {
                self.total = p.total;
                println!("🔍 [{}/{}] Testing {}...", p.current, p.total, p.location);
            }
            StreamEvent::LocationResult(result) => {
                self.reported += 1;
                println!("{}", format_location_line(self.reported, self.total, result));
            }
            StreamEvent::RunCompleted => println!("{}", "Run complete".bold()),
        }
    }
}

pub(crate) fn print_summary(record: &RunRecord, saved_to: Option<&Path>) {
    let summary = record.summary();

    println!();
    if let Some(path) = saved_to {
        println!("📊 Results saved: {}", path.display());
    }
    if let Some(user) = &record.user_info {
        println!(
            "📡 Tested from {} ({}) via {}",
            user.ip,
            user.country.as_deref().unwrap_or("N/A"),
            user.colo.as_deref().unwrap_or("N/A")
        );
    }

    let rate = format!("{:.1}%", summary.success_rate);
    let rate = if summary.successful == summary.total {
        rate.green()
    } else if summary.successful == 0 {
        rate.red()
    } else {
        rate.yellow()
    };
    println!(
        "✅ Success: {}/{} ({})",
        summary.successful, summary.total, rate
    );

    if summary.successful == 0 {
        return;
    }

    println!(
        "📊 Avg: {}, ↓{:.1} Mbps, ↑{:.1} Mbps",
        latency_colored(summary.avg_latency),
        summary.avg_download,
        summary.avg_upload
    );
    if let Some(best) = &summary.best_latency {
        println!(
            "🏆 Best latency: {} → {} ({:.1}ms)",
            best.location.name.bold(),
            best.server_city(),
            best.latency_ms()
        );
    }
    if let Some(best) = &summary.best_download {
        println!(
            "🏆 Best download: {} → {} ({:.1} Mbps)",
            best.location.name.bold(),
            best.server_city(),
            best.download_mbps()
        );
    }

    println!("-----------------");
    let total = record.tests.len();
    for (i, result) in record.tests.iter().enumerate() {
        println!("{}", format_location_line(i + 1, total, result));
    }
}

pub(crate) fn print_locations(catalog: &LocationCatalog) {
    println!(
        "🌍 Test Locations ({} total, {} regions)\n",
        catalog.len(),
        catalog.regions().len()
    );
    for (region, locations) in catalog.by_region() {
        println!("📍 {}:", region.bold());
        for loc in locations {
            println!("   • {} ({}) - {}", loc.name, loc.country_code, loc.description);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::models::fixtures::{location, measurement};

    #[test]
    fn location_line_shows_best_and_failure_reason() {
        colored::control::set_override(false);

        let isp_results = vec![measurement("Acme", 12.0, 300.0, 50.0)];
        let (aggregated_stats, best_isp) = aggregate(&isp_results);
        let mut ok = LocationResult::failed(location("Tokyo"), "x");
        ok.success = true;
        ok.error = None;
        ok.servers_attempted = 1;
        ok.isp_results = isp_results;
        ok.aggregated_stats = aggregated_stats;
        ok.best_isp = best_isp;
        let line = format_location_line(1, 2, &ok);
        assert!(line.contains("[1/2] Tokyo (1/1 ISPs): Best: Acme 12.0ms ↓300.0/↑50.0"));

        let failed = LocationResult::failed(location("Dubai"), "no endpoints found for Dubai");
        let line = format_location_line(2, 2, &failed);
        assert!(line.contains("[2/2] Dubai: no endpoints found for Dubai (0 ISPs tried)"));
    }
}
