#[cfg(test)]
mod tests_impl {
    use crate::core::compiler::{compile, Bridge};
    use crate::core::ports::{self, PortClass};
    use crate::core::rules::{ForwardRule, Rule, RuleKind, RuleSet, ServicePreset};
    use crate::core::test_helpers::{
        block_rule, fixed_timestamp, forward_rule, sample_rules, test_network,
        test_network_with_secondary,
    };

    // ═══════════════════════════════════════════════════════════════════════
    // Rule records
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_rule_serde_tagged_roundtrip() {
        let rule = block_rule("1.2.3.4", 24);
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"type\":\"block\""));

        let parsed: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule);

        let fwd = forward_rule(Some("10.0.3.15"), 2210, ServicePreset::Ssh, None);
        let json = serde_json::to_string(&fwd).unwrap();
        assert!(json.contains("\"type\":\"forward\""));
        let parsed: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, fwd);
    }

    #[test]
    fn test_new_rules_start_dirty() {
        let rule = block_rule("1.2.3.4", 32);
        assert!(rule.has_change);
        assert!(rule.updated_at.is_none());
    }

    #[test]
    fn test_destination_port_preset_wins() {
        let forward = ForwardRule {
            ip: None,
            port: 2210,
            preset: ServicePreset::Ssh,
            service_port: Some(9999),
        };
        // The preset's implied port takes precedence over service_port
        assert_eq!(forward.destination_port(), Some(22));
    }

    #[test]
    fn test_destination_port_per_preset() {
        for (preset, expected) in [
            (ServicePreset::Ssh, Some(22)),
            (ServicePreset::Http, Some(80)),
            (ServicePreset::Mysql, Some(3306)),
            (ServicePreset::None, None),
            (ServicePreset::Custom, None),
        ] {
            let forward = ForwardRule {
                ip: None,
                port: 2210,
                preset,
                service_port: None,
            };
            assert_eq!(forward.destination_port(), expected, "preset {preset:?}");
        }
    }

    #[test]
    fn test_target_requires_ip_and_port() {
        let draft = ForwardRule {
            ip: None,
            port: 2210,
            preset: ServicePreset::Ssh,
            service_port: None,
        };
        assert!(draft.target().is_none());

        let resolved = ForwardRule {
            ip: Some("10.0.3.15".parse().unwrap()),
            port: 2210,
            preset: ServicePreset::Custom,
            service_port: Some(8080),
        };
        assert_eq!(
            resolved.target(),
            Some(("10.0.3.15".parse().unwrap(), 8080))
        );
    }

    #[test]
    fn test_forward_port_taken_ignores_enabled_state() {
        let mut rules = RuleSet::new();
        let mut fwd = forward_rule(Some("10.0.3.15"), 2210, ServicePreset::Ssh, None);
        fwd.enabled = false;
        rules.rules.push(fwd);

        // Disabling does not free the slot
        assert!(rules.forward_port_taken(2210, None));
        assert!(ports::port_in_use(&rules, 2210));
    }

    #[test]
    fn test_forward_port_taken_except_self() {
        let mut rules = RuleSet::new();
        let fwd = forward_rule(Some("10.0.3.15"), 2210, ServicePreset::Ssh, None);
        let name = fwd.name;
        rules.rules.push(fwd);

        assert!(rules.forward_port_taken(2210, None));
        assert!(!rules.forward_port_taken(2210, Some(&name)));
    }

    #[test]
    fn test_clear_dirty() {
        let mut rules = sample_rules();
        assert_eq!(rules.dirty_count(), 2);
        rules.clear_dirty();
        assert_eq!(rules.dirty_count(), 0);
    }

    #[test]
    fn test_touch_redirties_and_stamps() {
        let mut rule = block_rule("1.2.3.4", 32);
        rule.has_change = false;
        rule.touch();
        assert!(rule.has_change);
        assert!(rule.updated_at.is_some());
    }

    #[test]
    fn test_remove_by_name() {
        let mut rules = sample_rules();
        let name = rules.rules[0].name;
        let removed = rules.remove(&name).unwrap();
        assert_eq!(removed.name, name);
        assert_eq!(rules.len(), 1);
        assert!(rules.remove(&name).is_none());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Port registry
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_port_allowed_boundaries() {
        for port in [2200, 2299, 3300, 3399, 4200, 4299, 8000, 8099] {
            assert!(ports::port_allowed(port), "port {port}");
        }
        for port in [1, 22, 80, 2199, 2300, 3299, 3400, 4199, 4300, 7999, 8100, 65535] {
            assert!(!ports::port_allowed(port), "port {port}");
        }
    }

    #[test]
    fn test_total_managed_ports() {
        assert_eq!(ports::total_managed_ports(), 400);
    }

    #[test]
    fn test_available_ports_excludes_claimed() {
        let mut rules = RuleSet::new();
        rules
            .rules
            .push(forward_rule(None, 2210, ServicePreset::Ssh, None));

        let free = ports::available_ports(&rules, PortClass::Ssh);
        assert_eq!(free.len(), 99);
        assert!(!free.contains(&2210));
        assert!(free.contains(&2211));
        assert!(free.first() == Some(&2200));
        assert!(free.last() == Some(&2299));
    }

    #[test]
    fn test_available_ports_all_subtracts_everything() {
        let mut rules = RuleSet::new();
        rules
            .rules
            .push(forward_rule(None, 2210, ServicePreset::Ssh, None));
        rules
            .rules
            .push(forward_rule(None, 8042, ServicePreset::Http, None));

        let free = ports::available_ports(&rules, PortClass::All);
        assert_eq!(free.len(), 398);
        assert!(!free.contains(&2210));
        assert!(!free.contains(&8042));
    }

    #[test]
    fn test_available_ports_prefix_filter_is_loose() {
        // A claimed port matching the class prefix is subtracted even when
        // its class cannot contain it; ports with other prefixes are not.
        let mut rules = RuleSet::new();
        rules
            .rules
            .push(forward_rule(None, 8042, ServicePreset::None, None));

        // 8042 starts with "80" -> attributed to the http class
        let free = ports::available_ports(&rules, PortClass::Http);
        assert_eq!(free.len(), 99);
        assert!(!free.contains(&8042));

        // ...but not to the ssh class ("22")
        let free = ports::available_ports(&rules, PortClass::Ssh);
        assert_eq!(free.len(), 100);
    }

    #[test]
    fn test_port_class_parses_legacy_alias() {
        use std::str::FromStr;
        assert_eq!(
            PortClass::from_str("shell-console").unwrap(),
            PortClass::Console
        );
        assert_eq!(
            PortClass::from_str("shellinabox").unwrap(),
            PortClass::Console
        );
        assert_eq!(PortClass::from_str("SSH").unwrap(), PortClass::Ssh);
        assert!(PortClass::from_str("ftp").is_err());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Compiler
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_empty_ruleset_document_structure() {
        let out = compile(&RuleSet::new(), &test_network(), fixed_timestamp());
        let text = &out.text;

        assert!(text.starts_with("# Generated on Tue Jan 2 03:04:05 2024\n"));
        assert!(text.ends_with("# Completed on Tue Jan 2 03:04:05 2024\n"));

        // Tables appear in fixed order
        let mangle = text.find("*mangle").unwrap();
        let nat = text.find("*nat").unwrap();
        let filter = text.find("*filter").unwrap();
        assert!(mangle < nat && nat < filter);

        assert_eq!(text.matches("COMMIT").count(), 3);
        assert_eq!(out.emitted, 0);
        assert_eq!(out.skipped, 0);
    }

    #[test]
    fn test_mangle_checksum_fill() {
        let out = compile(&RuleSet::new(), &test_network(), fixed_timestamp());
        assert!(out.text.contains(
            "-A POSTROUTING -o lxcbr0 -p udp -m udp --dport 68 -j CHECKSUM --checksum-fill"
        ));
    }

    #[test]
    fn test_primary_masquerade() {
        let out = compile(&RuleSet::new(), &test_network(), fixed_timestamp());
        assert!(out
            .text
            .contains("-A POSTROUTING -s 10.0.3.0/24 ! -d 10.0.3.0/24 -j MASQUERADE"));
    }

    #[test]
    fn test_baseline_acl_order() {
        let out = compile(&RuleSet::new(), &test_network(), fixed_timestamp());
        let text = &out.text;

        let funnel = text
            .find("-A INPUT -p tcp -m multiport --dports 2020 -j fail2ban-ssh")
            .unwrap();
        let loopback = text.find("-A INPUT -i lo -j ACCEPT").unwrap();
        let established = text
            .find("-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT")
            .unwrap();
        let invalid = text
            .find("-A INPUT -m conntrack --ctstate INVALID -j DROP")
            .unwrap();
        let https = text
            .find("-A INPUT -p tcp -m tcp --dport 443 -m conntrack --ctstate NEW,ESTABLISHED -j ACCEPT")
            .unwrap();
        let f2b_return = text.find("-A fail2ban-ssh -j RETURN").unwrap();

        assert!(funnel < loopback);
        assert!(loopback < established);
        assert!(established < invalid);
        assert!(invalid < https);
        assert!(https < f2b_return);
    }

    #[test]
    fn test_forward_ssh_preset_emits_dnat_pair() {
        let mut rules = RuleSet::new();
        rules
            .rules
            .push(forward_rule(Some("10.0.0.5"), 2210, ServicePreset::Ssh, None));

        let out = compile(&rules, &test_network(), fixed_timestamp());
        assert!(out.text.contains(
            "-A PREROUTING -p tcp -m tcp --dport 2210 -j DNAT --to-destination 10.0.0.5:22"
        ));
        assert!(out.text.contains(
            "-A PREROUTING -p udp -m udp --dport 2210 -j DNAT --to-destination 10.0.0.5:22"
        ));
        assert_eq!(out.emitted, 1);
        assert_eq!(out.skipped, 0);
    }

    #[test]
    fn test_forward_preset_destination_ports() {
        for (preset, port, dest) in [
            (ServicePreset::Http, 8042, 80),
            (ServicePreset::Mysql, 3342, 3306),
        ] {
            let mut rules = RuleSet::new();
            rules
                .rules
                .push(forward_rule(Some("10.0.3.7"), port, preset, None));

            let out = compile(&rules, &test_network(), fixed_timestamp());
            assert!(
                out.text.contains(&format!(
                    "--dport {port} -j DNAT --to-destination 10.0.3.7:{dest}"
                )),
                "preset {preset:?}"
            );
        }
    }

    #[test]
    fn test_forward_custom_uses_service_port() {
        let mut rules = RuleSet::new();
        rules.rules.push(forward_rule(
            Some("10.0.3.7"),
            4242,
            ServicePreset::Custom,
            Some(7681),
        ));

        let out = compile(&rules, &test_network(), fixed_timestamp());
        assert!(out.text.contains(
            "-A PREROUTING -p tcp -m tcp --dport 4242 -j DNAT --to-destination 10.0.3.7:7681"
        ));
    }

    #[test]
    fn test_forward_drafts_are_skipped_and_counted() {
        let mut rules = RuleSet::new();
        // no destination address
        rules
            .rules
            .push(forward_rule(None, 2210, ServicePreset::Ssh, None));
        // no resolvable destination port
        rules
            .rules
            .push(forward_rule(Some("10.0.3.7"), 4242, ServicePreset::Custom, None));

        let out = compile(&rules, &test_network(), fixed_timestamp());
        assert!(!out.text.contains("DNAT"));
        assert_eq!(out.emitted, 0);
        assert_eq!(out.skipped, 2);
    }

    #[test]
    fn test_disabled_rules_emit_nothing() {
        let mut rules = sample_rules();
        for rule in &mut rules.rules {
            rule.enabled = false;
        }

        let out = compile(&rules, &test_network(), fixed_timestamp());
        assert!(!out.text.contains("DNAT"));
        assert!(!out.text.contains("REJECT"));
        // Disabled rules are filtered, not counted as skipped
        assert_eq!(out.emitted, 0);
        assert_eq!(out.skipped, 0);
    }

    #[test]
    fn test_forward_order_follows_record_order() {
        let mut rules = RuleSet::new();
        for port in [2251, 2202, 2233] {
            rules
                .rules
                .push(forward_rule(Some("10.0.3.7"), port, ServicePreset::Ssh, None));
        }

        let out = compile(&rules, &test_network(), fixed_timestamp());
        let first = out.text.find("--dport 2251 ").unwrap();
        let second = out.text.find("--dport 2202 ").unwrap();
        let third = out.text.find("--dport 2233 ").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_block_rule_rejects_source() {
        let out = compile(&sample_rules(), &test_network(), fixed_timestamp());
        let text = &out.text;

        let reject = text.find("-A INPUT -s 123.123.123.123/32 -j REJECT").unwrap();
        let f2b_return = text.find("-A fail2ban-ssh -j RETURN").unwrap();
        // Blocks close the filter stanza, just before the fail2ban return
        assert!(reject < f2b_return);
        assert_eq!(out.emitted, 2);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let rules = sample_rules();
        let net = test_network();
        let a = compile(&rules, &net, fixed_timestamp());
        let b = compile(&rules, &net, fixed_timestamp());
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn test_no_secondary_wiring_by_default() {
        let out = compile(&RuleSet::new(), &test_network(), fixed_timestamp());
        assert!(!out.text.contains("ISOLATION"));
        assert!(!out.text.contains("addrtype"));
    }

    #[test]
    fn test_secondary_network_nat_dispatch() {
        let out = compile(
            &RuleSet::new(),
            &test_network_with_secondary(),
            fixed_timestamp(),
        );
        let text = &out.text;

        assert!(text.contains(":DOCKER0 - [0:0]"));
        assert!(text.contains("-A PREROUTING -m addrtype --dst-type LOCAL -j DOCKER0"));
        assert!(text.contains(
            "-A OUTPUT ! -d 127.0.0.0/8 -m addrtype --dst-type LOCAL -j DOCKER0"
        ));
        assert!(text.contains("-A POSTROUTING -s 172.17.0.0/16 ! -o docker0 -j MASQUERADE"));
        assert!(text.contains("-A DOCKER0 -i docker0 -j RETURN"));
    }

    #[test]
    fn test_secondary_dispatch_precedes_forwards() {
        let mut rules = RuleSet::new();
        rules
            .rules
            .push(forward_rule(Some("10.0.0.5"), 2210, ServicePreset::Ssh, None));

        let out = compile(&rules, &test_network_with_secondary(), fixed_timestamp());
        let dispatch = out
            .text
            .find("-A PREROUTING -m addrtype --dst-type LOCAL -j DOCKER0")
            .unwrap();
        let dnat = out.text.find("--dport 2210 -j DNAT").unwrap();
        assert!(dispatch < dnat);
    }

    #[test]
    fn test_secondary_network_isolation_wiring() {
        let out = compile(
            &RuleSet::new(),
            &test_network_with_secondary(),
            fixed_timestamp(),
        );
        let text = &out.text;

        assert!(text.contains(":DOCKER0-ISOLATION-STAGE-1 - [0:0]"));
        assert!(text.contains(":DOCKER0-ISOLATION-STAGE-2 - [0:0]"));
        assert!(text.contains("-A FORWARD -j DOCKER0-ISOLATION-STAGE-1"));
        assert!(text.contains(
            "-A DOCKER0-ISOLATION-STAGE-1 -i docker0 ! -o docker0 -j DOCKER0-ISOLATION-STAGE-2"
        ));
        assert!(text.contains("-A DOCKER0-ISOLATION-STAGE-2 -o docker0 -j DROP"));
        assert!(text.contains("-A OUTPUT -o lxcbr0 -p udp -m udp --sport 53 -j ACCEPT"));
    }

    #[test]
    fn test_bridge_chain_name() {
        let bridge = Bridge::new("docker0", "172.17.0.0/16".parse().unwrap());
        assert_eq!(bridge.chain(), "DOCKER0");

        let bridge = Bridge::new("br-lan.2", "192.168.2.0/24".parse().unwrap());
        assert_eq!(bridge.chain(), "BRLAN2");
    }

    #[test]
    fn test_ipv6_block_renders() {
        let mut rules = RuleSet::new();
        rules.rules.push(block_rule("2001:db8::1", 32));

        let out = compile(&rules, &test_network(), fixed_timestamp());
        assert!(out.text.contains("-A INPUT -s 2001:db8::1/32 -j REJECT"));
    }

    #[test]
    fn test_rule_kind_accessors() {
        let rules = sample_rules();
        assert_eq!(rules.block_count(), 1);
        assert_eq!(rules.forward_count(), 1);
        assert_eq!(rules.rules[0].kind.kind_name(), "block");
        assert_eq!(rules.rules[1].kind.kind_name(), "forward");
        assert!(matches!(rules.rules[1].kind, RuleKind::Forward(_)));
    }
}
