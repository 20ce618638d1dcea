mod common;

use common::{eval, machine, run, unhandled_type};
use condlisp::EvalError;

const LOG: &str = "(define log '()) (define (note x) (set! log (cons x log)))";

#[test]
fn handlers_match_by_supertype_innermost_first() {
    let mut m = machine();
    eval(&mut m, LOG).unwrap();
    let out = eval(
        &mut m,
        "(call/ec (lambda (k)
           (with-handler <condition> (lambda (c) (note 'condition) (k 'escaped))
             (lambda ()
               (with-handler <error> (lambda (c) (note 'error))
                 (lambda ()
                   (with-handler <arithmetic-error> (lambda (c) (note 'arithmetic))
                     (lambda ()
                       (with-handler <runtime-error> (lambda (c) (note 'runtime))
                         (lambda () (car 1))))))))))))
         (reverse log)",
    )
    .unwrap();
    assert_eq!(out, "(runtime error condition)");
}

#[test]
fn handler_does_not_see_itself() {
    let mut m = machine();
    let out = eval(
        &mut m,
        "(define count 0)
         (list
           (call/ec (lambda (k)
             (with-handler <error> (lambda (c) (k (condition-field c 'message)))
               (lambda ()
                 (with-handler <error>
                   (lambda (c) (set! count (+ count 1)) (error \"again\"))
                   (lambda () (error \"first\")))))))
           count)",
    )
    .unwrap();
    assert_eq!(out, "(\"again\" 1)");
}

#[test]
fn handlers_return_normally_for_non_errors() {
    assert_eq!(
        run("(define hits 0)
             (with-handler <warning> (lambda (c) (set! hits (+ hits 1)))
               (lambda () (warning \"careful\") (warning \"again\") 'finished))"),
        "finished"
    );
    assert_eq!(run("(warning \"nobody listens\")"), "()");
    assert_eq!(run("(signal (make-condition <condition> 'x 1))"), "()");
}

#[test]
fn handlers_are_removed_when_their_extent_ends() {
    let mut m = machine();
    let out = eval(
        &mut m,
        "(define hits 0)
         (with-handler <warning> (lambda (c) (set! hits (+ hits 1)))
           (lambda () (warning \"inside\")))
         (warning \"outside\")
         hits",
    )
    .unwrap();
    assert_eq!(out, "1");
    assert!(m.ctx.handlers.is_none());

    eval(
        &mut m,
        "(call/ec (lambda (k) (with-handler <error> (lambda (c) (k 1)) (lambda () (car 1)))))",
    )
    .unwrap();
    assert!(m.ctx.handlers.is_none());
    assert_eq!(m.pin_mark(), 0);
}

#[test]
fn unhandled_errors_carry_a_report() {
    let mut m = machine();
    match m.eval_str("(define (f x) (error \"boom\" x)) (f 7)") {
        Err(EvalError::Unhandled { type_name, report }) => {
            assert_eq!(type_name, "error");
            assert!(report.contains("message: \"boom\""), "{}", report);
            assert!(report.contains("irritants: (7)"), "{}", report);
            assert!(report.contains("Stack trace:"), "{}", report);
        }
        other => panic!("expected an unhandled error, got {:?}", other.map(|v| m.write_string(v))),
    }
    // The machine is still usable.
    assert_eq!(eval(&mut m, "(+ 1 2)").unwrap(), "3");
}

#[test]
fn runtime_errors_are_conditions() {
    let mut m = machine();
    assert_eq!(unhandled_type(&mut m, "undefined-thing"), "unbound-variable");
    assert_eq!(unhandled_type(&mut m, "((lambda (x) x))"), "wrong-argument-count");
    assert_eq!(unhandled_type(&mut m, "(car)"), "wrong-argument-count");
    assert_eq!(unhandled_type(&mut m, "(car 1)"), "type-mismatch");
    assert_eq!(unhandled_type(&mut m, "(5 1)"), "not-applicable");
    assert_eq!(unhandled_type(&mut m, "(/ 1 0)"), "arithmetic-error");
    assert_eq!(unhandled_type(&mut m, "(+ 9223372036854775807 1)"), "arithmetic-error");
    assert_eq!(unhandled_type(&mut m, "(let ((1 2)) 1)"), "malformed-expression");
}

#[test]
fn error_fields_are_visible_to_handlers() {
    assert_eq!(
        run("(call/ec (lambda (k)
               (with-handler <error>
                 (lambda (c) (k (list (condition-field c 'message)
                                      (condition-field c 'irritants)
                                      (pair? (condition-field c 'stack-trace)))))
                 (lambda () (error \"bad thing\" 1 2)))))"),
        "(\"bad thing\" (1 2) #t)"
    );
    assert_eq!(
        run("(call/ec (lambda (k)
               (with-handler <unbound-variable>
                 (lambda (c) (k (condition-field c 'name)))
                 (lambda () no-such-variable))))"),
        "no-such-variable"
    );
}

#[test]
fn user_condition_types() {
    let mut m = machine();
    eval(&mut m, "(define <my-error> (make-condition-type 'my-error <error>))").unwrap();
    assert_eq!(eval(&mut m, "(subtype? <my-error> <error>)").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(subtype? <my-error> <runtime-error>)").unwrap(), "#f");
    assert_eq!(eval(&mut m, "(condition-type-name <my-error>)").unwrap(), "my-error");
    assert_eq!(eval(&mut m, "(eq? (condition-type-parent <my-error>) <error>)").unwrap(), "#t");
    assert_eq!(
        eval(
            &mut m,
            "(call/ec (lambda (k)
               (with-handler <runtime-error> (lambda (c) (k 'wrong))
                 (lambda ()
                   (with-handler <error> (lambda (c) (k (condition-field c 'code)))
                     (lambda () (signal (make-condition <my-error> 'code 42))))))))"
        )
        .unwrap(),
        "42"
    );
    assert_eq!(unhandled_type(&mut m, "(signal (make-condition <my-error>))"), "my-error");
}

#[test]
fn condition_fields_shadow_older_values() {
    let mut m = machine();
    eval(&mut m, "(define c (make-condition <condition> 'a 1 'b 2))").unwrap();
    assert_eq!(eval(&mut m, "(condition-put-field! c 'a 3)").unwrap(), "3");
    assert_eq!(eval(&mut m, "(condition-field c 'a)").unwrap(), "3");
    assert_eq!(eval(&mut m, "(condition-field c 'b)").unwrap(), "2");
    assert_eq!(eval(&mut m, "(condition-field c 'zzz 'none)").unwrap(), "none");
    assert_eq!(
        eval(&mut m, "(map car (condition-fields c))").unwrap(),
        "(a b stack-trace)"
    );
    assert_eq!(eval(&mut m, "(eq? (condition-type c) <condition>)").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(condition? c)").unwrap(), "#t");
}

#[test]
fn restarts_are_ordinary_procedures() {
    let mut m = machine();
    eval(&mut m, "(define r (make-restart 'use-value (lambda (v) (* v 2)) \"Use a value\"))").unwrap();
    assert_eq!(eval(&mut m, "(invoke-restart r 21)").unwrap(), "42");
    assert_eq!(eval(&mut m, "(r 21)").unwrap(), "42");
    assert_eq!(eval(&mut m, "(restart-name r)").unwrap(), "use-value");
    assert_eq!(eval(&mut m, "(restart-description r)").unwrap(), "\"Use a value\"");
    assert_eq!(eval(&mut m, "(restart? r)").unwrap(), "#t");
}

#[test]
fn restart_offered_around_a_computation() {
    assert_eq!(
        run("(define (safe-div a b)
               (call/ec (lambda (k)
                 (let ((use-value (make-restart 'use-value k \"Return a value instead\")))
                   (with-handler <arithmetic-error>
                     (lambda (c) (invoke-restart use-value 0))
                     (lambda () (/ a b)))))))
             (list (safe-div 10 2) (safe-div 1 0))"),
        "(5 0)"
    );
}

#[test]
fn escapes_are_one_shot() {
    let mut m = machine();
    assert_eq!(eval(&mut m, "(call/ec (lambda (k) 1))").unwrap(), "1");
    assert_eq!(eval(&mut m, "(call/ec (lambda (k) (+ 1 (k 10))))").unwrap(), "10");
    assert_eq!(eval(&mut m, "(call-with-escape-continuation (lambda (k) (k)))").unwrap(), "()");
    eval(&mut m, "(define saved #f) (call/ec (lambda (k) (set! saved k) 1))").unwrap();
    assert_eq!(unhandled_type(&mut m, "(saved 2)"), "escape-expired");
}

#[test]
fn escapes_cross_nested_escapes() {
    assert_eq!(
        run("(call/ec (lambda (outer)
               (call/ec (lambda (inner) (outer 'from-inner)))
               'not-reached))"),
        "from-inner"
    );
}

#[test]
fn unwind_protect_runs_cleanup_on_every_exit() {
    let mut m = machine();
    eval(&mut m, "(define cleaned '())").unwrap();
    assert_eq!(
        eval(&mut m, "(unwind-protect 'normal (set! cleaned (cons 'a cleaned)))").unwrap(),
        "normal"
    );
    assert_eq!(
        eval(
            &mut m,
            "(call/ec (lambda (k) (unwind-protect (k 'out) (set! cleaned (cons 'b cleaned)))))"
        )
        .unwrap(),
        "out"
    );
    assert_eq!(
        unhandled_type(&mut m, "(unwind-protect (car 1) (set! cleaned (cons 'c cleaned)))"),
        "type-mismatch"
    );
    assert_eq!(eval(&mut m, "cleaned").unwrap(), "(c b a)");
}

#[test]
fn handler_bind_installs_the_first_clause_innermost() {
    let mut m = machine();
    eval(&mut m, LOG).unwrap();
    let out = eval(
        &mut m,
        "(call/ec (lambda (k)
           (with-handler <error> (lambda (c) (k 'done))
             (lambda ()
               (handler-bind ((<error> (lambda (c) (note 'first)))
                              (<error> (lambda (c) (note 'second))))
                 (error \"x\"))))))
         (reverse log)",
    )
    .unwrap();
    assert_eq!(out, "(first second)");
    assert!(m.ctx.handlers.is_none());
}

#[test]
fn stack_trace_lists_recent_steps() {
    let out = run("(define (f) (stack-trace)) (pair? (f))");
    assert_eq!(out, "#t");
    assert_eq!(
        run("(car (car (let ((t (stack-trace))) (reverse t))))"),
        "apply"
    );
}

#[test]
fn try_catches_errors_and_throw_tags_them() {
    assert_eq!(run("(try (lambda (c) 'caught) (lambda () (+ 1 2)))"), "3");
    assert_eq!(
        run("(try (lambda (c) (list (condition-field c 'tag) (condition-field c 'object)))
                  (lambda () (throw 'oops 42) 'not-reached))"),
        "(oops 42)"
    );
    assert_eq!(
        run("(try (lambda (c) (condition-field c 'message)) (lambda () (error \"bad\")))"),
        "\"bad\""
    );
    assert_eq!(
        run("(try (lambda (c) (condition-type-name (condition-type c))) (lambda () (car 1)))"),
        "type-mismatch"
    );
    assert_eq!(
        run("(try (lambda (c) (condition-field c 'tag)) (lambda () (abort)))"),
        "abort"
    );
    assert_eq!(run("(subtype? <exception> <error>)"), "#t");
}

#[test]
fn raise_signals_conditions_and_wraps_other_objects() {
    assert_eq!(
        run("(try (lambda (c) (list (condition-field c 'tag) (condition-field c 'object)))
                  (lambda () (raise \"plain\")))"),
        "(() \"plain\")"
    );
    assert_eq!(
        run("(define <my-error> (make-condition-type 'my-error <error>))
             (try (lambda (c) (condition-field c 'code))
                  (lambda () (raise (make-condition <my-error> 'code 7))))"),
        "7"
    );
    let mut m = machine();
    eval(&mut m, "(define e (make-exception 'later \"payload\"))").unwrap();
    assert_eq!(eval(&mut m, "(condition-field e 'object)").unwrap(), "\"payload\"");
    assert_eq!(unhandled_type(&mut m, "(raise e)"), "exception");
    assert_eq!(unhandled_type(&mut m, "(throw 'x 1)"), "exception");
    // A raised warning still never returns.
    assert_eq!(unhandled_type(&mut m, "(raise (make-condition <warning>))"), "error");
}

#[test]
fn try_nests_and_restores_handlers() {
    let mut m = machine();
    let out = eval(
        &mut m,
        "(try (lambda (outer) (list 'outer (condition-field outer 'tag)))
              (lambda ()
                (try (lambda (inner) (throw 'rethrown (condition-field inner 'tag)))
                     (lambda () (throw 'first #f)))))",
    )
    .unwrap();
    assert_eq!(out, "(outer rethrown)");
    assert!(m.ctx.handlers.is_none());
    assert_eq!(m.pin_mark(), 0);
}

#[test]
fn debugger_sees_unhandled_errors_first() {
    let mut m = machine();
    eval(
        &mut m,
        "(define seen '())
         (set-debugger! (lambda (c) (set! seen (cons (condition-type-name (condition-type c)) seen))))",
    )
    .unwrap();
    assert_eq!(unhandled_type(&mut m, "(car 1)"), "type-mismatch");
    // Handled errors and plain signals do not reach it.
    eval(&mut m, "(try (lambda (c) 'ok) (lambda () (error \"quiet\")))").unwrap();
    eval(&mut m, "(warning \"careful\")").unwrap();
    assert_eq!(eval(&mut m, "seen").unwrap(), "(type-mismatch)");

    // The debugger may leave through an escape instead.
    assert_eq!(
        eval(
            &mut m,
            "(call/ec (lambda (k)
               (set-debugger! (lambda (c) (k 'recovered)))
               (car 1)))"
        )
        .unwrap(),
        "recovered"
    );
    assert_eq!(eval(&mut m, "(procedure? (set-debugger! '()))").unwrap(), "#t");
    assert_eq!(unhandled_type(&mut m, "(car 1)"), "type-mismatch");
}

#[test]
fn debugger_can_watch_every_condition() {
    let mut m = machine();
    eval(
        &mut m,
        "(define seen 0)
         (set-debugger! (lambda (c) (set! seen (+ seen 1)) (car 'inside-debugger)))
         (set-invoke-debugger-on-all-conditions! #t)",
    )
    .unwrap();
    // The debugger's own failure does not re-enter it.
    assert_eq!(unhandled_type(&mut m, "(warning \"w\")"), "type-mismatch");
    eval(&mut m, "(set-debugger! (lambda (c) (set! seen (+ seen 1))))").unwrap();
    eval(&mut m, "(warning \"w\") (try (lambda (c) 'ok) (lambda () (error \"e\")))").unwrap();
    assert_eq!(eval(&mut m, "seen").unwrap(), "3");
    assert_eq!(unhandled_type(&mut m, "(car 1)"), "type-mismatch");
    assert_eq!(eval(&mut m, "seen").unwrap(), "4");
    eval(&mut m, "(set-invoke-debugger-on-all-conditions! #f)").unwrap();
    eval(&mut m, "(warning \"w\")").unwrap();
    assert_eq!(eval(&mut m, "seen").unwrap(), "4");
}

#[test]
fn enter_debugger_calls_the_installed_debugger() {
    assert_eq!(run("(enter-debugger 'why)"), "()");
    assert_eq!(
        run("(set-debugger! (lambda (reason) (list 'debugging reason))) (enter-debugger 'why)"),
        "(debugging why)"
    );
}
