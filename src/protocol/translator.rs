//! Translation of the neutral verb+args command model to OpenJ9
//! `ATTACH_*` command strings.

/// Maps a HotSpot-style command to its OpenJ9 equivalent. Unknown verbs
/// are passed through verbatim, arguments ignored.
pub fn translate(command: &str, args: &[String]) -> String {
    match command {
        "load" => {
            // load <path> [absolute] [options]
            if args.is_empty() {
                return "ATTACH_LOADAGENT(,)".to_owned();
            }
            let path = &args[0];
            let absolute = args.len() > 1 && args[1] == "true";
            let options = args.get(2).map(String::as_str).unwrap_or("");

            if absolute {
                format!("ATTACH_LOADAGENTPATH({path},{options})")
            } else {
                format!("ATTACH_LOADAGENT({path},{options})")
            }
        }

        "jcmd" => {
            // jcmd <command> [args...]
            if args.is_empty() {
                return "ATTACH_DIAGNOSTICS:help".to_owned();
            }
            format!("ATTACH_DIAGNOSTICS:{}", args.join(","))
        }

        "threaddump" => format!(
            "ATTACH_DIAGNOSTICS:Thread.print,{}",
            args.first().map(String::as_str).unwrap_or("")
        ),

        "dumpheap" => format!(
            "ATTACH_DIAGNOSTICS:Dump.heap,{}",
            args.first().map(String::as_str).unwrap_or("")
        ),

        "inspectheap" => format!(
            "ATTACH_DIAGNOSTICS:GC.class_histogram,{}",
            args.first().map(String::as_str).unwrap_or("")
        ),

        "datadump" => format!(
            "ATTACH_DIAGNOSTICS:Dump.java,{}",
            args.first().map(String::as_str).unwrap_or("")
        ),

        "properties" => "ATTACH_GETSYSTEMPROPERTIES".to_owned(),

        "agentProperties" => "ATTACH_GETAGENTPROPERTIES".to_owned(),

        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_load() {
        assert_eq!(translate("load", &[]), "ATTACH_LOADAGENT(,)");
        assert_eq!(
            translate("load", &owned(&["libagent.so"])),
            "ATTACH_LOADAGENT(libagent.so,)"
        );
        assert_eq!(
            translate("load", &owned(&["/opt/agent.so", "true", "opts"])),
            "ATTACH_LOADAGENTPATH(/opt/agent.so,opts)"
        );
        assert_eq!(
            translate("load", &owned(&["instrument", "false", "app.jar"])),
            "ATTACH_LOADAGENT(instrument,app.jar)"
        );
    }

    #[test]
    fn test_jcmd() {
        assert_eq!(translate("jcmd", &[]), "ATTACH_DIAGNOSTICS:help");
        assert_eq!(
            translate("jcmd", &owned(&["VM.version"])),
            "ATTACH_DIAGNOSTICS:VM.version"
        );
        assert_eq!(
            translate("jcmd", &owned(&["GC.heap_dump", "/tmp/dump.hprof"])),
            "ATTACH_DIAGNOSTICS:GC.heap_dump,/tmp/dump.hprof"
        );
    }

    #[test]
    fn test_diagnostic_verbs() {
        assert_eq!(
            translate("threaddump", &[]),
            "ATTACH_DIAGNOSTICS:Thread.print,"
        );
        assert_eq!(
            translate("threaddump", &owned(&["-l"])),
            "ATTACH_DIAGNOSTICS:Thread.print,-l"
        );
        assert_eq!(
            translate("dumpheap", &owned(&["/tmp/heap.dmp"])),
            "ATTACH_DIAGNOSTICS:Dump.heap,/tmp/heap.dmp"
        );
        assert_eq!(
            translate("inspectheap", &[]),
            "ATTACH_DIAGNOSTICS:GC.class_histogram,"
        );
        assert_eq!(translate("datadump", &[]), "ATTACH_DIAGNOSTICS:Dump.java,");
    }

    #[test]
    fn test_property_verbs() {
        assert_eq!(translate("properties", &[]), "ATTACH_GETSYSTEMPROPERTIES");
        assert_eq!(
            translate("agentProperties", &[]),
            "ATTACH_GETAGENTPROPERTIES"
        );
    }

    // Every documented verb yields a string with a known OpenJ9 prefix;
    // anything else passes through untouched.
    #[test]
    fn test_totality() {
        const PREFIXES: [&str; 5] = [
            "ATTACH_LOADAGENT",
            "ATTACH_LOADAGENTPATH",
            "ATTACH_DIAGNOSTICS:",
            "ATTACH_GETSYSTEMPROPERTIES",
            "ATTACH_GETAGENTPROPERTIES",
        ];
        for verb in [
            "load",
            "properties",
            "agentProperties",
            "datadump",
            "threaddump",
            "dumpheap",
            "inspectheap",
            "jcmd",
        ] {
            let translated = translate(verb, &owned(&["x"]));
            assert!(
                PREFIXES.iter().any(|p| translated.starts_with(p)),
                "{verb} -> {translated}"
            );
        }
        // setflag/printflag have no OpenJ9 diagnostic equivalent.
        assert_eq!(translate("setflag", &owned(&["a", "b"])), "setflag");
        assert_eq!(translate("printflag", &owned(&["a"])), "printflag");
        assert_eq!(translate("somethingelse", &[]), "somethingelse");
    }
}
