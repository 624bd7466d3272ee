//! Performance benchmarks for the parsers run on every tick

use std::time::Instant;
use updater::detector::{parse_app_info, parse_app_manifest};
use updater::process::{parse_ps_output, parse_wmic_csv, ProcessMatcher};
use updater::seed::{rewrite_launch_script, SeedPair};

const APP_MANIFEST: &str = r#""AppState"
{
	"appid"		"258550"
	"Universe"		"1"
	"name"		"Rust Dedicated Server"
	"StateFlags"		"4"
	"installdir"		"rust_dedicated"
	"LastUpdated"		"1760022250"
	"SizeOnDisk"		"9215604745"
	"buildid"		"14150020"
	"InstalledDepots"
	{
		"258551"
		{
			"manifest"		"6216330187327386125"
			"size"		"9215604745"
		}
		"258552"
		{
			"manifest"		"4852061932584307112"
			"size"		"45210093"
		}
	}
	"UserConfig"
	{
		"betakey"		"staging"
	}
}
"#;

/// Builds steamcmd output with `branches` extra branches before the real ones
fn app_info_output(branches: usize) -> String {
    let mut output = String::from("Loading Steam API...OK\nAppID : 258550\n\"258550\"\n{\n\t\"depots\"\n\t{\n\t\t\"branches\"\n\t\t{\n");
    for i in 0..branches {
        output.push_str(&format!(
            "\t\t\t\"test{}\"\n\t\t\t{{\n\t\t\t\t\"buildid\"\t\t\"{}\"\n\t\t\t\t\"timeupdated\"\t\t\"1760022250\"\n\t\t\t}}\n",
            i,
            13_000_000 + i
        ));
    }
    output.push_str("\t\t\t\"public\"\n\t\t\t{\n\t\t\t\t\"buildid\"\t\t\"14150020\"\n\t\t\t}\n");
    output.push_str("\t\t}\n\t}\n}\nUnloading Steam API...OK\n");
    output
}

fn ps_output(processes: usize) -> String {
    let mut output = String::new();
    for pid in 1..=processes {
        output.push_str(&format!("{:>6} /usr/lib/service-{} --flag value\n", pid, pid));
    }
    output.push_str(" 99999 ./RustDedicated -batchmode +server.seed 1234\n");
    output
}

/// Benchmarks app manifest parsing
#[test]
fn benchmark_app_manifest_parsing() {
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let descriptor = parse_app_manifest(APP_MANIFEST).unwrap();
        assert_eq!(descriptor.build_id.as_deref(), Some("14150020"));
    }

    let duration = start.elapsed();
    println!(
        "App manifest parsing: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks locating the build id in large steamcmd output
#[test]
fn benchmark_app_info_parsing() {
    let output = app_info_output(500);
    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let build_id = parse_app_info(&output, "258550", "public").unwrap();
        assert_eq!(build_id, "14150020");
    }

    let duration = start.elapsed();
    println!(
        "App info parsing ({} bytes): {} iterations in {:?} ({:.2} μs/iter)",
        output.len(),
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks process table parsing and matching
#[test]
fn benchmark_process_table_scan() {
    let output = ps_output(2_000);
    let matcher = ProcessMatcher::new("RustDedicated");
    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let records = parse_ps_output(&output);
        assert_eq!(matcher.select(&records), vec![99999]);
    }

    let duration = start.elapsed();
    println!(
        "Process table scan (2000 rows): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks wmic CSV parsing
#[test]
fn benchmark_wmic_parsing() {
    let mut output = String::from("\r\r\nNode,CommandLine,ProcessId\r\r\n");
    for pid in 1..=2_000 {
        output.push_str(&format!(
            "HOST,C:\\Windows\\system32\\svchost.exe -k netsvcs -p,{}\r\r\n",
            pid
        ));
    }

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        assert_eq!(parse_wmic_csv(&output).len(), 2_000);
    }

    let duration = start.elapsed();
    println!(
        "wmic parsing (2000 rows): {} iterations in {:?}",
        iterations, duration
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks launch script rewriting
#[test]
fn stress_test_launch_script_rewrite() {
    let mut script = String::from("@echo off\r\n");
    for i in 0..200 {
        script.push_str(&format!("echo line {}\r\n", i));
    }
    script.push_str("RustDedicated.exe -batchmode +server.seed 1 +server.salt 2\r\n");

    let seeds = SeedPair {
        seed: 123_456,
        salt: 654_321,
    };
    let iterations = 5_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let rewritten = rewrite_launch_script(&script, "RustDedicated", seeds).unwrap();
        assert!(rewritten.ends_with("+server.seed 123456 +server.salt 654321\r\n"));
    }

    let duration = start.elapsed();
    println!(
        "Launch script rewrite: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}
