// Verifier harness: replays the command lines embedded in a source
// file against a built engine.
//
// Lines beginning with exactly one `;` are commands, so a program and
// its expected behaviour travel in the same file; `;;` introduces a
// plain comment. Commands are whitespace separated:
//
//   ; inject LABEL VALUE
//   ; stabilize
//   ; expect LABEL VALUE

use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;

use crate::engine::Engine;


// Per-stabilisation snapshots of every input and observer, keyed by
// label. One entry per stabilize command.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphState {
    pub inputs: BTreeMap<String, Vec<f64>>,
    pub observers: BTreeMap<String, Vec<f64>>,
}


lazy_static! {
    static ref COMMAND: Regex = Regex::new(r"^;([^;].*)$").unwrap();
}

pub fn command_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| COMMAND.captures(line).map(|c| c[1].to_string()))
        .collect()
}


pub fn execute(engine: &mut dyn Engine, text: &str) -> (bool, String, GraphState) {
    let mut pass = true;
    let mut message = String::new();
    let mut state = GraphState::default();

    for line in command_lines(text) {
        let words: Vec<&str> = line.split_whitespace().collect();
        trace!("executioner: {:?}", words);
        match words.as_slice() {
            ["inject", label, value, ..] => match value.parse::<f64>() {
                Ok(value) => {
                    if let Some(point) = engine.input(label) {
                        point.set(value);
                    }
                }
                Err(_) => {
                    pass = false;
                    message += &format!("Could not parse inject value - {}\n", value);
                }
            },
            ["stabilize", ..] => {
                engine.stabilize(false);
                for (label, value) in engine.dump_inputs() {
                    state.inputs.entry(label).or_insert_with(Vec::new).push(value);
                }
                for (label, value) in engine.dump_observers() {
                    state
                        .observers
                        .entry(label)
                        .or_insert_with(Vec::new)
                        .push(value);
                }
            }
            ["expect", label, value, ..] => {
                if engine.is_dirty() {
                    pass = false;
                    message +=
                        &format!("Value checked before stabilization - {}=={}\n", label, value);
                }
                let expected = match value.parse::<f64>() {
                    Ok(expected) => expected,
                    Err(_) => {
                        pass = false;
                        message += &format!("Could not parse expect value - {}\n", value);
                        continue;
                    }
                };
                match engine.observer(label) {
                    Some(point) => {
                        if point.value != expected {
                            pass = false;
                            message += &format!(
                                "Value does not meet expectation - {}!={} actual {}\n",
                                label, value, point.value
                            );
                        }
                    }
                    None => {
                        pass = false;
                        message += &format!("No such observer - {}\n", label);
                    }
                }
            }
            _ => {}
        }
    }

    if pass {
        message = "All expectations met :)".to_string();
    }
    (pass, message, state)
}


// The trace as JSON, for logging alongside other tooling.
pub fn trace_json(state: &GraphState) -> String {
    serde_json::to_string(state).unwrap_or_else(|_| String::from("{}"))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::vm::Vm;

    // Every scenario runs on both back-ends, and their traces must
    // agree byte for byte.
    fn check(text: &str) -> GraphState {
        let mut interpreter = Interpreter::build(text).unwrap();
        let (pass, message, trace) = execute(&mut interpreter, text);
        assert!(pass, "interpreter: {}", message);

        let mut vm = Vm::build(text).unwrap();
        let (pass, message, vm_trace) = execute(&mut vm, text);
        assert!(pass, "vm: {}", message);

        assert_eq!(trace_json(&trace), trace_json(&vm_trace));
        trace
    }

    fn fails(text: &str) -> String {
        let mut interpreter = Interpreter::build(text).unwrap();
        let (pass, message, _) = execute(&mut interpreter, text);
        assert!(!pass);
        message
    }

    #[test]
    fn test_scalar_sum_scenario() {
        check(
            "(begin (input a) (input b) (observe \"s\" (+ a b)))\n\
             ; inject a 3\n\
             ; inject b 4\n\
             ; stabilize\n\
             ; expect s 7\n",
        );
    }

    #[test]
    fn test_ternary_scenario() {
        check(
            "(begin (input a) (observe \"y\" (? (> a 0) (* a 2) 0)))\n\
             ; inject a 5\n\
             ; stabilize\n\
             ; expect y 10\n\
             ; inject a -3\n\
             ; stabilize\n\
             ; expect y 0\n",
        );
    }

    #[test]
    fn test_list_fold_scenario() {
        check(
            "(begin (input list x 3) (observe \"sum\" (fold + 0 x)))\n\
             ; inject x[0] 1\n\
             ; inject x[1] 2\n\
             ; inject x[2] 4\n\
             ; stabilize\n\
             ; expect sum 7\n",
        );
    }

    #[test]
    fn test_lambda_scenario() {
        check(
            "(begin (input a) (define sq (lambda (v) (* v v))) (observe \"r\" (sq (+ a 1))))\n\
             ; inject a 4\n\
             ; stabilize\n\
             ; expect r 25\n",
        );
    }

    #[test]
    fn test_apply_max_scenario() {
        check(
            "(begin (input list xs 4) (observe \"m\" (apply max xs)))\n\
             ; inject xs[0] 1\n\
             ; inject xs[1] -2\n\
             ; inject xs[2] 7\n\
             ; inject xs[3] 3\n\
             ; stabilize\n\
             ; expect m 7\n",
        );
    }

    #[test]
    fn test_tick_scenario() {
        let trace = check(
            "(begin (input a) (observe \"t1\" (tick)) (observe \"t2\" a))\n\
             ; inject a 0\n\
             ; stabilize\n\
             ; expect t1 1\n\
             ; expect t2 0\n\
             ; inject a 1\n\
             ; stabilize\n\
             ; expect t1 2\n\
             ; expect t2 1\n",
        );
        assert_eq!(trace.observers["t1"], vec![1.0, 2.0]);
        assert_eq!(trace.observers["t2"], vec![0.0, 1.0]);
        assert_eq!(trace.inputs["a"], vec![0.0, 1.0]);
    }

    #[test]
    fn test_arithmetic_mix_scenario() {
        check(
            "(begin (input a) (input b)\n\
             (observe \"q\" (/ (* a b) 2))\n\
             (observe \"r\" (% a b))\n\
             (observe \"lo\" (min a b 0))\n\
             ; inject a 9\n\
             ; inject b 5\n\
             ; stabilize\n\
             ; expect q 22.5\n\
             ; expect r 4\n\
             ; expect lo 0\n",
        );
    }

    #[test]
    fn test_logic_scenario() {
        check(
            "(begin (input a) (input b)\n\
             (observe \"both\" (&& a b))\n\
             (observe \"either\" (|| a b))\n\
             (observe \"neither\" (not (|| a b)))\n\
             ; inject a 2\n\
             ; inject b 0\n\
             ; stabilize\n\
             ; expect both 0\n\
             ; expect either 1\n\
             ; expect neither 0\n",
        );
    }

    #[test]
    fn test_unary_math_scenario() {
        check(
            "(begin (input a)\n\
             (observe \"e\" (exp a))\n\
             (observe \"l\" (ln 1))\n\
             (observe \"t\" (trunc 2.9))\n\
             ; inject a 0\n\
             ; stabilize\n\
             ; expect e 1\n\
             ; expect l 0\n\
             ; expect t 2\n",
        );
    }

    #[test]
    fn test_zip_scenario() {
        check(
            "(begin (input list x 2) (input list y 2)\n\
             (observe \"z\" (map (lambda (p) (apply + p)) (zip x y)))\n\
             ; inject x[0] 1\n\
             ; inject x[1] 2\n\
             ; inject y[0] 10\n\
             ; inject y[1] 20\n\
             ; stabilize\n\
             ; expect z[0] 11\n\
             ; expect z[1] 22\n",
        );
    }

    #[test]
    fn test_list_builtin_scenario() {
        check(
            "(begin (input list x 3)\n\
             (observe \"first\" (car x))\n\
             (observe \"restsum\" (fold + 0 (rest x)))\n\
             (observe \"second\" (nth 1 x))\n\
             (observe \"base\" (fold + 0 (iota 4 1 1)))\n\
             ; inject x[0] 5\n\
             ; inject x[1] 6\n\
             ; inject x[2] 7\n\
             ; stabilize\n\
             ; expect first 5\n\
             ; expect restsum 13\n\
             ; expect second 6\n\
             ; expect base 10\n",
        );
    }

    #[test]
    fn test_nested_list_scenario() {
        check(
            "(begin (input list x 2 2)\n\
             (observe \"rows\" (map (lambda (r) (fold + 0 r)) x))\n\
             ; inject x[0][0] 1\n\
             ; inject x[0][1] 2\n\
             ; inject x[1][0] 3\n\
             ; inject x[1][1] 4\n\
             ; stabilize\n\
             ; expect rows[0] 3\n\
             ; expect rows[1] 7\n",
        );
    }

    #[test]
    fn test_inf_literals() {
        check(
            "(begin (input a)\n\
             (observe \"cap\" (min a INF))\n\
             (observe \"finite\" (? (< a INF) 1 0))\n\
             ; inject a 3\n\
             ; stabilize\n\
             ; expect cap 3\n\
             ; expect finite 1\n",
        );
    }

    #[test]
    fn test_incremental_reuse_scenario() {
        // Only the branch fed by the written input recomputes, and the
        // trace still matches the full pass of the compiled back-end.
        check(
            "(begin (input a) (input b)\n\
             (observe \"left\" (* a 10))\n\
             (observe \"right\" (* b 10))\n\
             ; inject a 1\n\
             ; inject b 2\n\
             ; stabilize\n\
             ; expect left 10\n\
             ; expect right 20\n\
             ; inject a 5\n\
             ; stabilize\n\
             ; expect left 50\n\
             ; expect right 20\n",
        );
    }

    #[test]
    fn test_expectation_failure() {
        let message = fails(
            "(begin (input a) (observe \"o\" (+ a 1)))\n\
             ; inject a 1\n\
             ; stabilize\n\
             ; expect o 3\n",
        );
        assert!(message.contains("does not meet expectation"), "{}", message);
        assert!(message.contains("actual 2"), "{}", message);
    }

    #[test]
    fn test_expect_before_stabilize_fails() {
        let message = fails(
            "(begin (input a) (observe \"o\" (+ a 1)))\n\
             ; inject a 1\n\
             ; expect o 2\n",
        );
        assert!(
            message.contains("checked before stabilization"),
            "{}",
            message
        );
    }

    #[test]
    fn test_unknown_observer_fails() {
        let message = fails(
            "(begin (input a) (observe \"o\" (+ a 1)))\n\
             ; stabilize\n\
             ; expect nope 2\n",
        );
        assert!(message.contains("No such observer"), "{}", message);
    }

    #[test]
    fn test_double_semicolons_are_plain_comments() {
        assert_eq!(
            command_lines(";; not a command\n; inject a 1\n;inject b 2\ncode"),
            vec![" inject a 1", "inject b 2"]
        );
    }

    #[test]
    fn test_unknown_commands_ignored() {
        check(
            "(begin (input a) (observe \"o\" a))\n\
             ; frobnicate everything\n\
             ; stabilize\n\
             ; expect o 0\n",
        );
    }

    #[test]
    fn test_trace_json() {
        let trace = check(
            "(begin (input a) (observe \"o\" (+ a 1)))\n\
             ; inject a 1\n\
             ; stabilize\n\
             ; expect o 2\n",
        );
        assert_eq!(
            trace_json(&trace),
            "{\"inputs\":{\"a\":[1.0]},\"observers\":{\"o\":[2.0]}}"
        );
    }

    #[test]
    fn test_trace_is_deterministic_across_runs() {
        let text = "(begin (input list x 2) (input a) \
                    (observe \"s\" (+ a (fold + 0 x))) (observe \"m\" (apply max x)))\n\
                    ; inject x[0] 5\n\
                    ; inject x[1] -1\n\
                    ; inject a 2\n\
                    ; stabilize\n\
                    ; expect s 6\n\
                    ; expect m 5\n";
        assert_eq!(trace_json(&check(text)), trace_json(&check(text)));
    }
}
